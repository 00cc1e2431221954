use serde::Deserialize;
use std::env;

use crate::constants::{
    IMAGE_GENERATION_BACKOFF_BASE_MS, IMAGE_GENERATION_MAX_ATTEMPTS, IMAGE_REQUEST_TIMEOUT_SECS,
    MAX_SESSION_TTL_HOURS, RECONCILE_INTERVAL_SECS, RECONCILE_STALE_AFTER_SECS,
};

/// Longest a live creation can spend before storing its image: every
/// generation attempt and one background removal at the request timeout,
/// plus the backoff between attempts.
pub fn max_image_pipeline_secs() -> u64 {
    let attempts = u64::from(IMAGE_GENERATION_MAX_ATTEMPTS.max(1));
    let backoff_ms: u64 = (1..attempts)
        .map(|attempt| IMAGE_GENERATION_BACKOFF_BASE_MS << (attempt - 1))
        .sum();
    (attempts + 1) * IMAGE_REQUEST_TIMEOUT_SECS + backoff_ms.div_ceil(1000)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub public_base_url: Option<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // KV (Redis). In-process store when unset.
    pub redis_url: Option<String>,

    // Blob storage
    pub blob_dir: String,

    // Sessions
    pub jwt_secret: String,
    pub session_ttl_hours: u64,
    pub cookie_secure: bool,

    // Image generation
    pub stability_api_key: Option<String>,
    pub stability_api_url: String,
    pub stability_engine: String,

    // Admin
    pub admin_token: Option<String>,

    // CORS
    pub cors_allowed_origins: String,

    // Reconciler
    pub reconcile_interval_secs: u64,
    pub reconcile_stale_after_secs: i64,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8787".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            public_base_url: env_optional("PUBLIC_BASE_URL"),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/sprout.db?mode=rwc".to_string()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            redis_url: env_optional("REDIS_URL"),

            blob_dir: env::var("BLOB_DIR").unwrap_or_else(|_| "data/blobs".to_string()),

            jwt_secret: env::var("JWT_SECRET")?,
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse()?,
            cookie_secure: env_flag("COOKIE_SECURE", true),

            stability_api_key: env_optional("STABILITY_API_KEY"),
            stability_api_url: env::var("STABILITY_API_URL")
                .unwrap_or_else(|_| "https://api.stability.ai".to_string()),
            stability_engine: env::var("STABILITY_ENGINE")
                .unwrap_or_else(|_| "stable-diffusion-xl-1024-v1-0".to_string()),

            admin_token: env_optional("ADMIN_TOKEN"),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),

            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(RECONCILE_INTERVAL_SECS),
            reconcile_stale_after_secs: env::var("RECONCILE_STALE_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(RECONCILE_STALE_AFTER_SECS),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        if self.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET is empty");
        }
        if self.session_ttl_hours == 0 {
            anyhow::bail!("SESSION_TTL_HOURS must be > 0");
        }
        if self.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            anyhow::bail!("SESSION_TTL_HOURS must be at most {}", MAX_SESSION_TTL_HOURS);
        }
        if self.blob_dir.trim().is_empty() {
            anyhow::bail!("BLOB_DIR is empty");
        }
        url::Url::parse(&self.stability_api_url)
            .map_err(|e| anyhow::anyhow!("STABILITY_API_URL is invalid: {}", e))?;
        if let Some(base) = &self.public_base_url {
            url::Url::parse(base)
                .map_err(|e| anyhow::anyhow!("PUBLIC_BASE_URL is invalid: {}", e))?;
        }

        if self.jwt_secret.len() < 32 {
            tracing::warn!("JWT_SECRET is shorter than 32 bytes");
        }
        if self.jwt_secret.contains("change_me") || self.jwt_secret.contains("super_secret") {
            tracing::warn!("Detected dev credentials in config");
        }
        if self.stability_api_key.is_none() {
            tracing::warn!("STABILITY_API_KEY is not set; creations will fail");
        }
        if self.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN is not set; admin routes are disabled");
        }
        if self.redis_url.is_none() {
            tracing::warn!("REDIS_URL is not set; using in-process KV store (single node only)");
        }
        if !self.cookie_secure && !self.is_development() {
            tracing::warn!("COOKIE_SECURE is disabled outside development");
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be > 0");
        }
        // Reconciling sooner would fail creations that are still generating.
        let min_stale = max_image_pipeline_secs();
        if !u64::try_from(self.reconcile_stale_after_secs).is_ok_and(|secs| secs > min_stale) {
            anyhow::bail!("RECONCILE_STALE_AFTER_SECS must be greater than {}", min_stale);
        }

        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn session_ttl_secs(&self) -> i64 {
        i64::try_from(self.session_ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX)
    }

    /// Public URL of a creation image. Relative unless `PUBLIC_BASE_URL` is set.
    pub fn image_url(&self, creation_id: &str) -> String {
        let path = format!("/api/creations/{}/image", creation_id);
        match &self.public_base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => path,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 8787,
        environment: "test".to_string(),
        public_base_url: None,
        database_url: "sqlite::memory:".to_string(),
        database_max_connections: 1,
        redis_url: None,
        blob_dir: "unused".to_string(),
        jwt_secret: "test_secret_with_enough_length_for_hs256".to_string(),
        session_ttl_hours: 24,
        cookie_secure: true,
        stability_api_key: None,
        stability_api_url: "http://localhost:9".to_string(),
        stability_engine: "test-engine".to_string(),
        admin_token: Some("admin-token".to_string()),
        cors_allowed_origins: "*".to_string(),
        reconcile_interval_secs: 60,
        reconcile_stale_after_secs: 300,
    }
}
