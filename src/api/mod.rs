// src/api/mod.rs

pub mod admin;
pub mod auth;
pub mod characters;
pub mod cookie;
pub mod creations;
pub mod health;
pub mod lore;
pub mod world;


use axum::{
    extract::FromRequest,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::Config,
    constants::{KV_NAMESPACE_CACHE, KV_NAMESPACE_CREATIONS, SESSION_COOKIE_NAME},
    crypto::{hash::token_hash, jwt::verify_jwt},
    db::Database,
    error::{AppError, Result},
    models::{Session, User},
    services::{
        CharacterService, CreationService, ImageGenerator, LoreService, RetryPolicy, WorldHub,
        WorldService,
    },
    storage::{BlobStore, KvNamespace, KvStore},
    websocket,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: KvNamespace,
    pub creations: KvNamespace,
    pub blobs: Arc<dyn BlobStore>,
    pub generator: Arc<dyn ImageGenerator>,
    pub hub: WorldHub,
    pub config: Config,
    pub image_retry: RetryPolicy,
}

impl AppState {
    pub fn new(
        db: Database,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn ImageGenerator>,
        config: Config,
    ) -> Self {
        Self {
            db,
            cache: KvNamespace::new(kv.clone(), KV_NAMESPACE_CACHE),
            creations: KvNamespace::new(kv, KV_NAMESPACE_CREATIONS),
            blobs,
            generator,
            hub: WorldHub::default(),
            config,
            image_retry: RetryPolicy::default(),
        }
    }

    pub fn creation_service(&self) -> CreationService {
        CreationService::new(
            self.db.clone(),
            self.cache.clone(),
            self.creations.clone(),
            self.blobs.clone(),
            self.generator.clone(),
            self.hub.clone(),
            self.config.clone(),
        )
        .with_retry_policy(self.image_retry)
    }

    pub fn character_service(&self) -> CharacterService {
        CharacterService::new(
            self.db.clone(),
            self.cache.clone(),
            self.creations.clone(),
            self.hub.clone(),
        )
    }

    pub fn lore_service(&self) -> LoreService {
        LoreService::new(self.db.clone(), self.hub.clone())
    }

    pub fn world_service(&self) -> WorldService {
        WorldService::new(self.db.clone(), self.cache.clone(), self.hub.clone())
    }
}

/// JSON body extractor whose rejections use the API error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Authenticated caller and the session that authenticated it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

/// Session token from the `session` cookie, falling back to a Bearer header.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie::extract_cookie(headers, SESSION_COOKIE_NAME) {
        return Some(token);
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolves the caller. The sessions table decides validity: the token must
/// verify, match its session row, and that row must not be expired.
pub async fn require_user(headers: &HeaderMap, state: &AppState) -> Result<AuthContext> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;
    let claims = verify_jwt(&token, &state.config.jwt_secret)
        .ok_or_else(|| AppError::AuthError("Invalid or expired session".to_string()))?;

    let session = state
        .db
        .get_session(&claims.sid)
        .await?
        .ok_or_else(|| AppError::AuthError("Session not found".to_string()))?;
    if session.user_id != claims.sub
        || session.token_hash != token_hash(&token)
        || session.is_expired_at(Utc::now())
    {
        return Err(AppError::AuthError("Invalid or expired session".to_string()));
    }

    let user = state
        .db
        .get_user(&session.user_id)
        .await?
        .ok_or_else(|| AppError::AuthError("User no longer exists".to_string()))?;

    Ok(AuthContext { user, session })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Auth
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/wallet/verify", post(auth::verify_wallet))
        .route("/api/auth/change-password", post(auth::change_password))
        // Characters
        .route("/api/characters", get(characters::list_characters))
        .route("/api/characters/mint", post(characters::mint))
        .route("/api/characters/{id}/water", post(characters::water))
        // Creations
        .route("/api/creations", post(creations::create))
        .route("/api/creations/can-create", get(creations::can_create))
        .route("/api/creations/{id}", get(creations::get_creation))
        .route("/api/creations/{id}/image", get(creations::get_image))
        .route("/api/creations/{id}/name", put(creations::rename))
        // Lore
        .route(
            "/api/lore/characters/{id}/lore",
            get(lore::list_lore).post(lore::add_lore),
        )
        // World
        .route("/api/world/state", get(world::get_state))
        .route("/api/world/milestones", get(world::get_milestones))
        .route("/api/world/events", get(world::get_events))
        .route("/api/world/admin/season", post(admin::set_season))
        // Realtime
        .route("/api/realtime", get(websocket::realtime::handler))
        .with_state(state)
}
