use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub kv: String,
}

fn connectivity(ok: bool) -> String {
    if ok { "connected" } else { "disconnected" }.to_string()
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();
    let kv_ok = state.cache.ping().await;

    let status = if database_ok && kv_ok { "ok" } else { "degraded" };
    if status != "ok" {
        tracing::warn!("Health check degraded database={} kv={}", database_ok, kv_ok);
    }

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: connectivity(database_ok),
        kv: connectivity(kv_ok),
    })
}
