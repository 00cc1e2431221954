use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub sid: String, // session id
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: &str, session_id: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

pub fn create_jwt(claims: &Claims, secret: &str) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to generate token: {}", e)))
}

/// Returns the claims of a correctly signed, unexpired token.
pub fn verify_jwt(token: &str, secret: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Some(data.claims),
        Err(err) => {
            tracing::debug!("Rejected token: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "jwt_test_secret_0123456789abcdef";

    fn claims_expiring_in(seconds: i64) -> Claims {
        let now = Utc::now();
        Claims::new("user-1", "session-1", now, now + Duration::seconds(seconds))
    }

    #[test]
    fn round_trip_with_same_secret() {
        let claims = claims_expiring_in(3600);
        let token = create_jwt(&claims, SECRET).expect("token");
        assert_eq!(verify_jwt(&token, SECRET), Some(claims));
    }

    #[test]
    fn rejects_different_secret() {
        let token = create_jwt(&claims_expiring_in(3600), SECRET).expect("token");
        assert_eq!(verify_jwt(&token, "another_secret_0123456789abcdef"), None);
    }

    #[test]
    fn rejects_expired_token() {
        let token = create_jwt(&claims_expiring_in(-10), SECRET).expect("token");
        assert_eq!(verify_jwt(&token, SECRET), None);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(verify_jwt("not.a.jwt", SECRET), None);
        assert_eq!(verify_jwt("", SECRET), None);
    }
}
