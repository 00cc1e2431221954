use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use crate::{
    error::Result,
    models::{ApiResponse, CreateLoreRequest, LoreEntry},
};

use super::{require_user, ApiJson, AppState};

#[derive(Debug, Deserialize)]
pub struct LoreQuery {
    pub limit: Option<u32>,
}

/// POST /api/lore/characters/{id}/lore
pub async fn add_lore(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(character_id): Path<String>,
    ApiJson(req): ApiJson<CreateLoreRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LoreEntry>>)> {
    let auth = require_user(&headers, &state).await?;
    let entry = state
        .lore_service()
        .add_entry(&auth.user.id, &character_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(entry))))
}

/// GET /api/lore/characters/{id}/lore
pub async fn list_lore(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    Query(query): Query<LoreQuery>,
) -> Result<Json<ApiResponse<Vec<LoreEntry>>>> {
    let entries = state
        .lore_service()
        .list_entries(&character_id, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}
