// All service modules
pub mod character_service;
pub mod creation_service;
pub mod image_generator;
pub mod lore_service;
pub mod rate_limiter;
pub mod realtime;
pub mod reconciler;
pub mod world_service;

// Re-export for convenience
pub use character_service::CharacterService;
pub use creation_service::{CreationService, ReconcileReport};
pub use image_generator::{generate_sprite, ImageGenerator, RetryPolicy, StabilityClient};
pub use lore_service::LoreService;
pub use rate_limiter::{day_key, next_utc_midnight, DailyLimiter};
pub use realtime::WorldHub;
pub use reconciler::CreationReconciler;
pub use world_service::{retry_world_write, WorldService};

#[cfg(test)]
pub(crate) use image_generator::{test_png, ScriptedGenerator};

use std::sync::Arc;

use crate::{config::Config, db::Database};

/// Start all background services
pub async fn start_background_services(creations: CreationService, db: Database, config: Config) {
    tracing::info!("Starting background services...");

    let reconciler = Arc::new(CreationReconciler::new(creations, db, &config));
    reconciler.start().await;

    tracing::info!(
        "Creation reconciler running every {}s (stale after {}s)",
        config.reconcile_interval_secs,
        config.reconcile_stale_after_secs
    );
}
