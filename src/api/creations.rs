use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::Result,
    models::{ApiResponse, CanCreateResponse, Character, CreateCreationRequest, RenameCreationRequest},
};

use super::{require_user, ApiJson, AppState};

/// POST /api/creations
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateCreationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Character>>)> {
    let auth = require_user(&headers, &state).await?;
    let creation = state.creation_service().create(&auth.user, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(creation))))
}

/// GET /api/creations/can-create
pub async fn can_create(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CanCreateResponse>>> {
    let auth = require_user(&headers, &state).await?;
    let status = state.creation_service().can_create(&auth.user.id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// GET /api/creations/{id}
pub async fn get_creation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Character>>> {
    let creation = state.creation_service().get(&id).await?;
    Ok(Json(ApiResponse::success(creation)))
}

/// GET /api/creations/{id}/image
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let blob = state.creation_service().image(&id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, blob.metadata.content_type),
            (header::CACHE_CONTROL, blob.metadata.cache_control),
        ],
        blob.bytes,
    )
        .into_response())
}

/// PUT /api/creations/{id}/name
pub async fn rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RenameCreationRequest>,
) -> Result<Json<ApiResponse<Character>>> {
    let auth = require_user(&headers, &state).await?;
    let creation = state
        .creation_service()
        .rename(&auth.user.id, &id, &req.name)
        .await?;
    Ok(Json(ApiResponse::success(creation)))
}
