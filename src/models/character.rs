use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ==================== CHARACTER / CREATION ====================
/// A minted creature. The same shape is stored as the SQL row, the KV
/// creation record and the outbox payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Character {
    pub id: String,
    pub owner_user_id: String,
    pub wallet_address: Option<String>,
    pub name: String,
    pub level: i64,
    pub water_count: i64,
    pub is_legendary: bool,
    pub image_url: String,
    pub prompt: String,
    pub seed: Option<i64>,
    pub background_removed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCreationRequest {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub level: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RenameCreationRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CanCreateResponse {
    pub can_create: bool,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct WaterResponse {
    pub character: Character,
    pub evolved: bool,
    pub previous_level: i64,
}

// ==================== CREATION OUTBOX ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    BlobStored,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BlobStored => "blob_stored",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "blob_stored" => Ok(Self::BlobStored),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown intent status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreationIntent {
    pub id: String,
    pub user_id: String,
    pub day: String,
    pub status: String,
    pub payload: sqlx::types::Json<Character>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreationIntent {
    pub fn status(&self) -> IntentStatus {
        self.status.parse().unwrap_or(IntentStatus::Failed)
    }
}

// ==================== LORE ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoreEntry {
    pub id: String,
    pub character_id: String,
    pub author_user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLoreRequest {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_status_round_trips_through_str() {
        for status in [
            IntentStatus::Pending,
            IntentStatus::BlobStored,
            IntentStatus::Completed,
            IntentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>(), Ok(status));
        }
        assert!("unknown".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!IntentStatus::Pending.is_terminal());
        assert!(!IntentStatus::BlobStored.is_terminal());
        assert!(IntentStatus::Completed.is_terminal());
        assert!(IntentStatus::Failed.is_terminal());
    }
}
