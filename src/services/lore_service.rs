use chrono::Utc;
use uuid::Uuid;

use crate::{
    constants::{LORE_DEFAULT_LIMIT, MAX_LORE_CHARS, MAX_PAGE_LIMIT},
    db::Database,
    error::{AppError, Result},
    models::{LoreEntry, RealtimeEvent},
    services::WorldHub,
    utils::clamp_page_limit,
};

pub struct LoreService {
    db: Database,
    hub: WorldHub,
}

impl LoreService {
    pub fn new(db: Database, hub: WorldHub) -> Self {
        Self { db, hub }
    }

    /// Appends an entry. Only the character's owner may write its lore.
    pub async fn add_entry(
        &self,
        user_id: &str,
        character_id: &str,
        content: &str,
    ) -> Result<LoreEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::BadRequest("Lore content cannot be empty".to_string()));
        }
        if content.chars().count() > MAX_LORE_CHARS {
            return Err(AppError::BadRequest(format!(
                "Lore content must be at most {} characters",
                MAX_LORE_CHARS
            )));
        }

        let character = self
            .db
            .get_character(character_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Character not found".to_string()))?;
        if character.owner_user_id != user_id {
            return Err(AppError::Forbidden(
                "Only the owner can write this character's lore".to_string(),
            ));
        }

        let entry = LoreEntry {
            id: Uuid::new_v4().to_string(),
            character_id: character.id,
            author_user_id: user_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.db.insert_lore(&entry).await?;

        self.hub.publish(RealtimeEvent::LoreAdded {
            character_id: entry.character_id.clone(),
            lore_id: entry.id.clone(),
        });
        Ok(entry)
    }

    /// Oldest first.
    pub async fn list_entries(
        &self,
        character_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<LoreEntry>> {
        if self.db.get_character(character_id).await?.is_none() {
            return Err(AppError::NotFound("Character not found".to_string()));
        }
        let limit = clamp_page_limit(limit, LORE_DEFAULT_LIMIT, MAX_PAGE_LIMIT);
        self.db.list_lore(character_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_database, models::{Character, User}};

    async fn seeded() -> LoreService {
        let db = test_database().await;
        let now = Utc::now();
        for (id, name) in [("u1", "fern"), ("u2", "moss")] {
            db.create_user(&User {
                id: id.to_string(),
                username: name.to_string(),
                password_hash: "hash".to_string(),
                solana_address: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("user");
        }
        let character = Character {
            id: "cr_1".to_string(),
            owner_user_id: "u1".to_string(),
            wallet_address: None,
            name: "Sprout".to_string(),
            level: 1,
            water_count: 0,
            is_legendary: false,
            image_url: "/api/creations/cr_1/image".to_string(),
            prompt: "a sprout".to_string(),
            seed: None,
            background_removed: false,
            created_at: now,
            updated_at: now,
        };
        db.insert_creation_intent("2026-01-01", &character).await.expect("intent");
        db.finalize_creation(&character).await.expect("character");
        LoreService::new(db, WorldHub::default())
    }

    #[tokio::test]
    async fn owner_can_append_and_list() {
        let service = seeded().await;
        service.add_entry("u1", "cr_1", "  Born at dawn.  ").await.expect("first");
        service.add_entry("u1", "cr_1", "Drank the rain.").await.expect("second");

        let entries = service.list_entries("cr_1", None).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "Born at dawn.");
        assert_eq!(service.list_entries("cr_1", Some(1)).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn non_owner_is_forbidden() {
        let service = seeded().await;
        let err = service.add_entry("u2", "cr_1", "hello").await.expect_err("forbidden");
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn content_is_validated() {
        let service = seeded().await;
        assert!(matches!(
            service.add_entry("u1", "cr_1", "   ").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.add_entry("u1", "cr_1", &"x".repeat(1_001)).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.add_entry("u1", "cr_missing", "hi").await,
            Err(AppError::NotFound(_))
        ));
    }
}
