use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::{
    constants::{MAX_PASSWORD_CHARS, MIN_PASSWORD_CHARS},
    error::{AppError, Result},
};

/// Length and content rules for new passwords.
pub fn validate_password(password: &str) -> Result<()> {
    let chars = password.chars().count();
    if password.trim().is_empty() {
        return Err(AppError::BadRequest("Password cannot be empty".to_string()));
    }
    if chars < MIN_PASSWORD_CHARS {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    if chars > MAX_PASSWORD_CHARS {
        return Err(AppError::BadRequest(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_CHARS
        )));
    }
    if password.chars().any(|c| c.is_control()) {
        return Err(AppError::BadRequest(
            "Password contains invalid control characters".to_string(),
        ));
    }
    Ok(())
}

/// Argon2id PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_original_password() {
        let hash = hash_password("correct horse battery").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash));
    }

    #[test]
    fn verify_rejects_other_password() {
        let hash = hash_password("correct horse battery").expect("hash");
        assert!(!verify_password("correct horse battery!", &hash));
        assert!(!verify_password("", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").expect("hash");
        let b = hash_password("same-password").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "plain-text"));
    }

    #[test]
    fn policy_checks_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("        ").is_err());
        assert!(validate_password(&"x".repeat(129)).is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
