use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    constants::{MAX_USERNAME_CHARS, MIN_USERNAME_CHARS},
    crypto::{
        hash::token_hash,
        jwt::{create_jwt, Claims},
        password::{hash_password, validate_password, verify_password},
        signature::SignatureVerifier,
    },
    error::{AppError, Result},
    models::{
        ApiResponse, AuthResponse, ChangePasswordRequest, LoginRequest, Session, SignupRequest,
        User, UserInfo, WalletVerifyRequest,
    },
};

use super::{cookie, require_user, ApiJson, AppState};

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub sessions_revoked: u64,
}

// ==================== HANDLERS ====================

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<Response> {
    let username = validate_username(&req.username)?;
    validate_password(&req.password)?;

    let solana_address = match req.solana_address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => {
            SignatureVerifier::parse_address(address)?;
            Some(address.to_string())
        }
        _ => None,
    };

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        password_hash: hash_password(&req.password)?,
        solana_address,
        created_at: now,
        updated_at: now,
    };
    state.db.create_user(&user).await?;
    tracing::info!("User signed up user_id={}", user.id);

    let (token, expires_at) = issue_session(&state, &user).await?;
    Ok(session_response(&state, StatusCode::CREATED, &user, token, expires_at))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Response> {
    let user = state
        .db
        .get_user_by_username(req.username.trim())
        .await?
        .filter(|user| verify_password(&req.password, &user.password_hash))
        .ok_or_else(|| AppError::AuthError("Invalid username or password".to_string()))?;

    let (token, expires_at) = issue_session(&state, &user).await?;
    tracing::info!("User logged in user_id={}", user.id);
    Ok(session_response(&state, StatusCode::OK, &user, token, expires_at))
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let auth = require_user(&headers, &state).await?;
    state.db.delete_session(&auth.session.id).await?;

    Ok((
        [(
            header::SET_COOKIE,
            cookie::clear_session_cookie(state.config.cookie_secure),
        )],
        Json(ApiResponse::success(LogoutResponse { logged_out: true })),
    )
        .into_response())
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<UserInfo>>> {
    let auth = require_user(&headers, &state).await?;
    Ok(Json(ApiResponse::success(UserInfo::from(&auth.user))))
}

/// POST /api/auth/wallet/verify
pub async fn verify_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<WalletVerifyRequest>,
) -> Result<Json<ApiResponse<UserInfo>>> {
    let auth = require_user(&headers, &state).await?;

    if !req.message.contains(&auth.user.username) {
        return Err(AppError::BadRequest(
            "Signed message must contain your username".to_string(),
        ));
    }
    let address = req.address.trim();
    if !SignatureVerifier::verify_signature(address, &req.message, &req.signature)? {
        return Err(AppError::InvalidSignature);
    }

    state.db.set_solana_address(&auth.user.id, address).await?;
    let user = state
        .db
        .get_user(&auth.user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tracing::info!("Wallet linked user_id={} address={}", user.id, address);

    Ok(Json(ApiResponse::success(UserInfo::from(&user))))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<ChangePasswordResponse>>> {
    let auth = require_user(&headers, &state).await?;

    if !verify_password(&req.current_password, &auth.user.password_hash) {
        return Err(AppError::AuthError("Current password is incorrect".to_string()));
    }
    validate_password(&req.new_password)?;

    let password_hash = hash_password(&req.new_password)?;
    state.db.update_password(&auth.user.id, &password_hash).await?;
    let sessions_revoked = state
        .db
        .delete_other_sessions(&auth.user.id, &auth.session.id)
        .await?;

    Ok(Json(ApiResponse::success(ChangePasswordResponse {
        sessions_revoked,
    })))
}

// ==================== HELPER FUNCTIONS ====================

pub fn validate_username(raw: &str) -> Result<String> {
    let username = raw.trim();
    let chars = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&chars) {
        return Err(AppError::BadRequest(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_CHARS, MAX_USERNAME_CHARS
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AppError::BadRequest(
            "Username may only contain letters, digits and underscores".to_string(),
        ));
    }
    Ok(username.to_string())
}

/// Creates a session row and the JWT that points at it.
async fn issue_session(
    state: &AppState,
    user: &User,
) -> Result<(String, chrono::DateTime<Utc>)> {
    let now = Utc::now();
    let expires_at = Duration::try_seconds(state.config.session_ttl_secs())
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AppError::Internal("Session lifetime is out of range".to_string()))?;
    let session_id = Uuid::new_v4().to_string();

    let claims = Claims::new(&user.id, &session_id, now, expires_at);
    let token = create_jwt(&claims, &state.config.jwt_secret)?;

    state
        .db
        .create_session(&Session {
            id: session_id,
            user_id: user.id.clone(),
            token_hash: token_hash(&token),
            expires_at,
            created_at: now,
        })
        .await?;

    Ok((token, expires_at))
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    user: &User,
    token: String,
    expires_at: chrono::DateTime<Utc>,
) -> Response {
    let set_cookie = cookie::session_cookie(
        &token,
        state.config.session_ttl_secs(),
        state.config.cookie_secure,
    );
    (
        status,
        [(header::SET_COOKIE, set_cookie)],
        Json(ApiResponse::success(AuthResponse {
            user: UserInfo::from(user),
            token,
            expires_at,
        })),
    )
        .into_response()
}
