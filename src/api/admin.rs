use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, SetSeasonRequest, WorldState},
};

use super::{ApiJson, AppState};

/// Checks `Authorization: Bearer <ADMIN_TOKEN>`.
fn require_admin_token(headers: &HeaderMap, state: &AppState) -> Result<()> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Forbidden("ADMIN_TOKEN is not configured. Admin routes are disabled.".to_string())
        })?;

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::AuthError("Missing admin token".to_string()))?;

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(AppError::AuthError("Invalid admin token".to_string()));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// POST /api/world/admin/season
pub async fn set_season(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SetSeasonRequest>,
) -> Result<Json<ApiResponse<WorldState>>> {
    require_admin_token(&headers, &state)?;
    let world = state.world_service().set_season(req).await?;
    Ok(Json(ApiResponse::success(world)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq(b"admin-token", b"admin-token"));
        assert!(!constant_time_eq(b"admin-token", b"admin-tokem"));
        assert!(!constant_time_eq(b"admin", b"admin-token"));
    }
}
