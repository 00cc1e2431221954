use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Character;

// ==================== WORLD STATE ====================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorldState {
    pub total_characters: i64,
    pub total_waters: i64,
    pub season: i64,
    pub phase: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorldEventRow {
    pub id: i64,
    pub event_type: String,
    pub payload: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Milestone {
    pub key: String,
    pub metric: String,
    pub target: i64,
    pub current: i64,
    pub reached: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetSeasonRequest {
    pub season: i64,
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

// ==================== REALTIME ====================
/// Messages fanned out to realtime subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    CharacterSpawn {
        character: Character,
    },
    CharacterWatered {
        character_id: String,
        water_count: i64,
        level: i64,
    },
    CharacterEvolved {
        character_id: String,
        from_level: i64,
        to_level: i64,
    },
    CharacterRenamed {
        character_id: String,
        name: String,
    },
    LoreAdded {
        character_id: String,
        lore_id: String,
    },
    SeasonChange {
        season: i64,
        phase: String,
    },
}

impl RealtimeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CharacterSpawn { .. } => "character_spawn",
            Self::CharacterWatered { .. } => "character_watered",
            Self::CharacterEvolved { .. } => "character_evolved",
            Self::CharacterRenamed { .. } => "character_renamed",
            Self::LoreAdded { .. } => "lore_added",
            Self::SeasonChange { .. } => "season_change",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_event_serializes_with_type_tag() {
        let event = RealtimeEvent::SeasonChange {
            season: 2,
            phase: "bloom".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "season_change");
        assert_eq!(json["season"], 2);
        assert_eq!(event.event_type(), "season_change");
    }
}
