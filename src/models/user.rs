use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ==================== USER ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub solana_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user, safe to return from any route.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub solana_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            solana_address: user.solana_address.clone(),
            created_at: user.created_at,
        }
    }
}

// ==================== SESSION ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ==================== AUTH REQUESTS ====================
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub solana_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct WalletVerifyRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserInfo,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ==================== API RESPONSE ====================
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            username: "fern".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            solana_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn api_response_success_sets_flag() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.data, "ok");
    }

    #[test]
    fn user_serialization_skips_password_hash() {
        let json = serde_json::to_string(&sample_user()).expect("serialize");
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn session_expiry_is_inclusive() {
        let now = Utc::now();
        let session = Session {
            id: "s".to_string(),
            user_id: "u".to_string(),
            token_hash: "h".to_string(),
            expires_at: now,
            created_at: now - Duration::hours(1),
        };
        assert!(session.is_expired_at(now));
        assert!(!session.is_expired_at(now - Duration::seconds(1)));
    }
}
