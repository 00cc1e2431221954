use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{
    error::Result,
    models::{ApiResponse, Character, CreateCreationRequest, WaterResponse},
};

use super::{require_user, ApiJson, AppState};

/// POST /api/characters/mint
///
/// Same pipeline and daily limit as `POST /api/creations`.
pub async fn mint(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateCreationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Character>>)> {
    let auth = require_user(&headers, &state).await?;
    let character = state.creation_service().create(&auth.user, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(character))))
}

/// POST /api/characters/{id}/water
pub async fn water(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WaterResponse>>> {
    let auth = require_user(&headers, &state).await?;
    let result = state.character_service().water(&auth.user.id, &id).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /api/characters
pub async fn list_characters(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Character>>>> {
    let auth = require_user(&headers, &state).await?;
    let characters = state.character_service().list_for_owner(&auth.user.id).await?;
    Ok(Json(ApiResponse::success(characters)))
}
