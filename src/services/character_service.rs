use crate::{
    constants::{EVOLUTION_THRESHOLDS, MAX_LEVEL, MAX_NAME_CHARS, MIN_LEVEL},
    db::Database,
    error::{AppError, Result},
    models::{Character, RealtimeEvent, WaterResponse},
    services::{retry_world_write, DailyLimiter, WorldHub, WorldService},
    storage::KvNamespace,
};

/// Highest level unlocked by `water_count` waters.
pub fn level_for_waters(water_count: i64) -> i64 {
    EVOLUTION_THRESHOLDS
        .iter()
        .filter(|(_, required)| water_count >= *required)
        .map(|(level, _)| *level)
        .max()
        .unwrap_or(MIN_LEVEL)
}

/// Level after watering; never decreases and never exceeds the cap.
pub fn next_level(current_level: i64, water_count: i64) -> i64 {
    current_level
        .max(level_for_waters(water_count))
        .clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Trims and checks a display name.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::BadRequest(format!(
            "Name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(AppError::BadRequest(
            "Name contains invalid characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

pub struct CharacterService {
    db: Database,
    creations: KvNamespace,
    limiter: DailyLimiter,
    world: WorldService,
    hub: WorldHub,
}

impl CharacterService {
    pub fn new(db: Database, cache: KvNamespace, creations: KvNamespace, hub: WorldHub) -> Self {
        Self {
            creations,
            limiter: DailyLimiter::new(cache.clone()),
            world: WorldService::new(db.clone(), cache, hub.clone()),
            db,
            hub,
        }
    }

    pub async fn list_for_owner(&self, user_id: &str) -> Result<Vec<Character>> {
        self.db.list_characters_by_owner(user_id).await
    }

    /// One water per user per character per UTC day.
    pub async fn water(&self, user_id: &str, character_id: &str) -> Result<WaterResponse> {
        if self.db.get_character(character_id).await?.is_none() {
            return Err(AppError::NotFound("Character not found".to_string()));
        }

        if !self.limiter.claim_water(user_id, character_id).await? {
            return Err(AppError::Conflict(
                "You already watered this character today".to_string(),
            ));
        }

        let applied = retry_world_write("water counter", || {
            self.db.apply_water(character_id, next_level)
        })
        .await;

        let (before, after) = match applied {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                self.release_claim(user_id, character_id).await;
                return Err(AppError::NotFound("Character not found".to_string()));
            }
            Err(err) => {
                self.release_claim(user_id, character_id).await;
                return Err(err);
            }
        };

        if let Err(e) = self.creations.put_json(&after.id, &after, None).await {
            tracing::warn!("Creation KV update failed id={}: {}", after.id, e);
        }
        self.world.invalidate_cache().await;

        self.hub.publish(RealtimeEvent::CharacterWatered {
            character_id: after.id.clone(),
            water_count: after.water_count,
            level: after.level,
        });
        let evolved = after.level > before.level;
        if evolved {
            tracing::info!(
                "Character {} evolved {} -> {}",
                after.id,
                before.level,
                after.level
            );
            self.hub.publish(RealtimeEvent::CharacterEvolved {
                character_id: after.id.clone(),
                from_level: before.level,
                to_level: after.level,
            });
        }

        Ok(WaterResponse {
            previous_level: before.level,
            evolved,
            character: after,
        })
    }

    async fn release_claim(&self, user_id: &str, character_id: &str) {
        if let Err(e) = self.limiter.release_water(user_id, character_id).await {
            tracing::warn!("Failed to release water claim for {}: {}", character_id, e);
        }
    }
}
