use tokio::time::Duration;

use crate::{
    constants::{
        CHARACTER_MILESTONES, MAX_PAGE_LIMIT, WATER_MILESTONES, WORLD_COUNTER_BACKOFF_MS,
        WORLD_COUNTER_MAX_ATTEMPTS, WORLD_EVENTS_DEFAULT_LIMIT, WORLD_PHASES,
        WORLD_STATE_CACHE_KEY, WORLD_STATE_CACHE_TTL_SECS,
    },
    db::Database,
    error::{AppError, Result},
    models::{Milestone, RealtimeEvent, SetSeasonRequest, WorldEventRow, WorldState},
    services::WorldHub,
    storage::KvNamespace,
    utils::{clamp_page_limit, retry_async},
};

/// Retries a world-counter transaction with the world-counter backoff.
pub async fn retry_world_write<T, F, Fut>(label: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    retry_async(
        label,
        WORLD_COUNTER_MAX_ATTEMPTS,
        Duration::from_millis(WORLD_COUNTER_BACKOFF_MS),
        op,
    )
    .await
}

/// Progress of the world totals against the fixed milestone ladders.
pub fn milestones(state: &WorldState) -> Vec<Milestone> {
    let ladder = |metric: &str, targets: &[i64], current: i64| {
        targets
            .iter()
            .map(|target| Milestone {
                key: format!("{}_{}", metric, target),
                metric: metric.to_string(),
                target: *target,
                current,
                reached: current >= *target,
            })
            .collect::<Vec<_>>()
    };

    let mut all = ladder("characters", &CHARACTER_MILESTONES, state.total_characters);
    all.extend(ladder("waters", &WATER_MILESTONES, state.total_waters));
    all
}

pub struct WorldService {
    db: Database,
    cache: KvNamespace,
    hub: WorldHub,
}

impl WorldService {
    pub fn new(db: Database, cache: KvNamespace, hub: WorldHub) -> Self {
        Self { db, cache, hub }
    }

    /// Cached world state; KV failures fall back to SQL.
    pub async fn get_state(&self) -> Result<WorldState> {
        match self.cache.get_json::<WorldState>(WORLD_STATE_CACHE_KEY).await {
            Ok(Some(state)) => return Ok(state),
            Ok(None) => {}
            Err(e) => tracing::warn!("World state cache read failed: {}", e),
        }

        let state = self.db.get_world_state().await?;
        if let Err(e) = self
            .cache
            .put_json(
                WORLD_STATE_CACHE_KEY,
                &state,
                Some(WORLD_STATE_CACHE_TTL_SECS),
            )
            .await
        {
            tracing::warn!("World state cache write failed: {}", e);
        }
        Ok(state)
    }

    pub async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.delete(WORLD_STATE_CACHE_KEY).await {
            tracing::warn!("World state cache invalidation failed: {}", e);
        }
    }

    pub async fn get_milestones(&self) -> Result<Vec<Milestone>> {
        let state = self.get_state().await?;
        Ok(milestones(&state))
    }

    pub async fn list_events(&self, limit: Option<u32>) -> Result<Vec<WorldEventRow>> {
        let limit = clamp_page_limit(limit, WORLD_EVENTS_DEFAULT_LIMIT, MAX_PAGE_LIMIT);
        self.db.list_world_events(limit).await
    }

    pub async fn set_season(&self, req: SetSeasonRequest) -> Result<WorldState> {
        if req.season < 1 {
            return Err(AppError::BadRequest("Season must be at least 1".to_string()));
        }
        let phase = match req.phase {
            Some(phase) => {
                let phase = phase.trim().to_ascii_lowercase();
                if !WORLD_PHASES.contains(&phase.as_str()) {
                    return Err(AppError::BadRequest(format!(
                        "Phase must be one of: {}",
                        WORLD_PHASES.join(", ")
                    )));
                }
                phase
            }
            None => self.db.get_world_state().await?.phase,
        };

        let state = retry_world_write("season update", || {
            self.db.set_season(req.season, &phase)
        })
        .await?;

        self.invalidate_cache().await;
        self.hub.publish(RealtimeEvent::SeasonChange {
            season: state.season,
            phase: state.phase.clone(),
        });
        tracing::info!("World season set to {} ({})", state.season, state.phase);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_database, storage::MemoryKv};
    use chrono::Utc;
    use std::sync::Arc;

    async fn service() -> (WorldService, KvNamespace, WorldHub) {
        let db = test_database().await;
        let cache = KvNamespace::new(Arc::new(MemoryKv::new()), "cache");
        let hub = WorldHub::default();
        (WorldService::new(db, cache.clone(), hub.clone()), cache, hub)
    }

    #[test]
    fn milestones_track_progress() {
        let state = WorldState {
            total_characters: 12,
            total_waters: 5,
            season: 1,
            phase: "dawn".to_string(),
            updated_at: Utc::now(),
        };
        let all = milestones(&state);
        assert_eq!(all.len(), 10);
        let reached: Vec<_> = all.iter().filter(|m| m.reached).map(|m| m.key.as_str()).collect();
        assert_eq!(reached, vec!["characters_1", "characters_10"]);
        for milestone in &all {
            let expected = if milestone.metric == "waters" { 5 } else { 12 };
            assert_eq!(milestone.current, expected);
        }
    }

    #[tokio::test]
    async fn state_is_cached_after_first_read() {
        let (service, cache, _) = service().await;
        let state = service.get_state().await.expect("state");
        assert_eq!(state.season, 1);
        let cached: Option<WorldState> = cache.get_json(WORLD_STATE_CACHE_KEY).await.expect("kv");
        assert_eq!(cached, Some(state));
    }

    #[tokio::test]
    async fn set_season_invalidates_and_broadcasts() {
        let (service, cache, hub) = service().await;
        let mut rx = hub.subscribe();
        service.get_state().await.expect("prime cache");

        let state = service
            .set_season(SetSeasonRequest {
                season: 2,
                phase: Some("Bloom".to_string()),
            })
            .await
            .expect("season");
        assert_eq!(state.season, 2);
        assert_eq!(state.phase, "bloom");
        assert!(cache.get(WORLD_STATE_CACHE_KEY).await.expect("kv").is_none());
        assert!(matches!(
            rx.recv().await.expect("event"),
            RealtimeEvent::SeasonChange { season: 2, .. }
        ));

        let events = service.list_events(None).await.expect("events");
        assert_eq!(events[0].event_type, "season_change");
    }

    #[tokio::test]
    async fn set_season_validates_input() {
        let (service, _, _) = service().await;
        let zero = service
            .set_season(SetSeasonRequest {
                season: 0,
                phase: None,
            })
            .await;
        assert!(matches!(zero, Err(AppError::BadRequest(_))));
        let bad_phase = service
            .set_season(SetSeasonRequest {
                season: 2,
                phase: Some("winter".to_string()),
            })
            .await;
        assert!(matches!(bad_phase, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn set_season_keeps_phase_when_omitted() {
        let (service, _, _) = service().await;
        let state = service
            .set_season(SetSeasonRequest {
                season: 4,
                phase: None,
            })
            .await
            .expect("season");
        assert_eq!(state.phase, "dawn");
    }
}
