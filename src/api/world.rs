use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::Result,
    models::{ApiResponse, EventsQuery, Milestone, WorldEventRow, WorldState},
};

use super::AppState;

/// GET /api/world/state
pub async fn get_state(State(state): State<AppState>) -> Result<Json<ApiResponse<WorldState>>> {
    let world = state.world_service().get_state().await?;
    Ok(Json(ApiResponse::success(world)))
}

/// GET /api/world/milestones
pub async fn get_milestones(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Milestone>>>> {
    let milestones = state.world_service().get_milestones().await?;
    Ok(Json(ApiResponse::success(milestones)))
}

/// GET /api/world/events?limit=
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<WorldEventRow>>>> {
    let events = state.world_service().list_events(query.limit).await?;
    Ok(Json(ApiResponse::success(events)))
}
