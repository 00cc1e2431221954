use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::*,
};

/// Result of committing a creation to SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Inserted,
    AlreadyPresent,
    /// The intent was already failed; nothing was written.
    Abandoned,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn map_unique_violation(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Database(err),
    }
}

impl Database {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ==================== USER QUERIES ====================
impl Database {
    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, solana_address, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.solana_address)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Username or wallet address already registered"))?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_solana_address(&self, user_id: &str, address: &str) -> Result<()> {
        sqlx::query("UPDATE users SET solana_address = ?, updated_at = ? WHERE id = ?")
            .bind(address)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "Wallet address already linked to another user"))?;
        Ok(())
    }
}

// ==================== SESSION QUERIES ====================
impl Database {
    pub async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_other_sessions(&self, user_id: &str, keep_session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ? AND id != ?")
            .bind(user_id)
            .bind(keep_session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== CHARACTER QUERIES ====================
impl Database {
    pub async fn get_character(&self, id: &str) -> Result<Option<Character>> {
        let row = sqlx::query_as::<_, Character>("SELECT * FROM characters WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_characters_by_owner(&self, owner_user_id: &str) -> Result<Vec<Character>> {
        let rows = sqlx::query_as::<_, Character>(
            "SELECT * FROM characters WHERE owner_user_id = ? ORDER BY created_at DESC, id",
        )
        .bind(owner_user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn rename_character(&self, id: &str, name: &str) -> Result<Option<Character>> {
        sqlx::query("UPDATE characters SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_character(id).await
    }

    /// Completes a creation: marks the outbox intent completed, inserts the
    /// character row, and bumps the world counter and logs the spawn event
    /// only when the row is new. A failed intent is never resurrected.
    pub async fn finalize_creation(&self, character: &Character) -> Result<FinalizeOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE creation_intents SET status = ?, error = NULL, updated_at = ?
             WHERE id = ? AND status != 'failed'",
        )
        .bind(IntentStatus::Completed.as_str())
        .bind(now)
        .bind(&character.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::Abandoned);
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO characters
                (id, owner_user_id, wallet_address, name, level, water_count, is_legendary,
                 image_url, prompt, seed, background_removed, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&character.id)
        .bind(&character.owner_user_id)
        .bind(&character.wallet_address)
        .bind(&character.name)
        .bind(character.level)
        .bind(character.water_count)
        .bind(character.is_legendary)
        .bind(&character.image_url)
        .bind(&character.prompt)
        .bind(character.seed)
        .bind(character.background_removed)
        .bind(character.created_at)
        .bind(character.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(
                "UPDATE world_state SET total_characters = total_characters + 1, updated_at = ?
                 WHERE id = 1",
            )
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let payload = serde_json::json!({
                "character_id": character.id,
                "owner_user_id": character.owner_user_id,
                "name": character.name,
                "is_legendary": character.is_legendary,
            });
            sqlx::query(
                "INSERT INTO world_events (event_type, payload, created_at) VALUES (?, ?, ?)",
            )
            .bind("character_spawn")
            .bind(sqlx::types::Json(payload))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(if inserted {
            FinalizeOutcome::Inserted
        } else {
            FinalizeOutcome::AlreadyPresent
        })
    }

    /// Adds one water to a character, applying the evolved level computed by
    /// `next_level`, and bumps the world water counter in the same transaction.
    /// Returns the row before and after the update.
    pub async fn apply_water(
        &self,
        id: &str,
        next_level: impl Fn(i64, i64) -> i64,
    ) -> Result<Option<(Character, Character)>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let Some(before) = sqlx::query_as::<_, Character>("SELECT * FROM characters WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let water_count = before.water_count + 1;
        let level = next_level(before.level, water_count);

        sqlx::query(
            "UPDATE characters SET water_count = ?, level = ?, updated_at = ? WHERE id = ?",
        )
        .bind(water_count)
        .bind(level)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE world_state SET total_waters = total_waters + 1, updated_at = ? WHERE id = 1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let payload = serde_json::json!({
            "character_id": id,
            "water_count": water_count,
            "from_level": before.level,
            "to_level": level,
        });
        let event_type = if level > before.level {
            "character_evolved"
        } else {
            "character_watered"
        };
        sqlx::query("INSERT INTO world_events (event_type, payload, created_at) VALUES (?, ?, ?)")
            .bind(event_type)
            .bind(sqlx::types::Json(payload))
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let after = sqlx::query_as::<_, Character>("SELECT * FROM characters WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((before, after)))
    }
}

// ==================== CREATION OUTBOX QUERIES ====================
impl Database {
    pub async fn insert_creation_intent(&self, day: &str, payload: &Character) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO creation_intents (id, user_id, day, status, payload, error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&payload.id)
        .bind(&payload.owner_user_id)
        .bind(day)
        .bind(IntentStatus::Pending.as_str())
        .bind(sqlx::types::Json(payload))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_creation_intent(&self, id: &str) -> Result<Option<CreationIntent>> {
        let row =
            sqlx::query_as::<_, CreationIntent>("SELECT * FROM creation_intents WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// Returns false when the intent already reached a terminal state.
    pub async fn mark_intent_blob_stored(&self, payload: &Character) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE creation_intents SET status = ?, payload = ?, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'blob_stored')",
        )
        .bind(IntentStatus::BlobStored.as_str())
        .bind(sqlx::types::Json(payload))
        .bind(Utc::now())
        .bind(&payload.id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    /// Fails an intent that has not stored its image yet. Returns false when
    /// it had already moved on.
    pub async fn mark_intent_failed(&self, id: &str, error: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE creation_intents SET status = ?, error = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(IntentStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    pub async fn record_intent_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE creation_intents SET error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Non-terminal intents last touched before `before`, oldest first.
    pub async fn list_stale_intents(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CreationIntent>> {
        let rows = sqlx::query_as::<_, CreationIntent>(
            "SELECT * FROM creation_intents
             WHERE status IN ('pending', 'blob_stored') AND updated_at < ?
             ORDER BY updated_at ASC
             LIMIT ?",
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ==================== LORE QUERIES ====================
impl Database {
    pub async fn insert_lore(&self, entry: &LoreEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO lore_entries (id, character_id, author_user_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.character_id)
        .bind(&entry.author_user_id)
        .bind(&entry.content)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_lore(&self, character_id: &str, limit: i64) -> Result<Vec<LoreEntry>> {
        let rows = sqlx::query_as::<_, LoreEntry>(
            "SELECT * FROM lore_entries WHERE character_id = ?
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(character_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ==================== WORLD QUERIES ====================
impl Database {
    pub async fn get_world_state(&self) -> Result<WorldState> {
        let row = sqlx::query_as::<_, WorldState>(
            "SELECT total_characters, total_waters, season, phase, updated_at
             FROM world_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_season(&self, season: i64, phase: &str) -> Result<WorldState> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE world_state SET season = ?, phase = ?, updated_at = ? WHERE id = 1")
            .bind(season)
            .bind(phase)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO world_events (event_type, payload, created_at) VALUES (?, ?, ?)")
            .bind("season_change")
            .bind(sqlx::types::Json(
                serde_json::json!({ "season": season, "phase": phase }),
            ))
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let state = sqlx::query_as::<_, WorldState>(
            "SELECT total_characters, total_waters, season, phase, updated_at
             FROM world_state WHERE id = 1",
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(state)
    }

    pub async fn list_world_events(&self, limit: i64) -> Result<Vec<WorldEventRow>> {
        let rows = sqlx::query_as::<_, WorldEventRow>(
            "SELECT * FROM world_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) async fn test_database() -> Database {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory url")
        .foreign_keys(true);
    // A single long-lived connection keeps the in-memory database alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("connect sqlite memory");
    let db = Database { pool };
    db.run_migrations().await.expect("migrations");
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(id: &str, username: &str) -> User {
        let now = Utc::now();
        User {
            id: id.to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            solana_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_character(id: &str, owner: &str) -> Character {
        let now = Utc::now();
        Character {
            id: id.to_string(),
            owner_user_id: owner.to_string(),
            wallet_address: None,
            name: "Sprout".to_string(),
            level: 1,
            water_count: 0,
            is_legendary: false,
            image_url: format!("/api/creations/{}/image", id),
            prompt: "a tiny sprout".to_string(),
            seed: Some(7),
            background_removed: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn database_new_returns_error_on_invalid_url() {
        let mut config = crate::config::test_config();
        config.database_url = "not-a-url".to_string();
        let result = Database::new(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_username_is_conflict() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("first insert");
        let err = db
            .create_user(&sample_user("u2", "fern"))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn finalize_creation_is_idempotent() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let character = sample_character("cr_1", "u1");
        db.insert_creation_intent("2026-01-01", &character)
            .await
            .expect("intent");

        assert_eq!(
            db.finalize_creation(&character).await.expect("first"),
            FinalizeOutcome::Inserted
        );
        assert_eq!(
            db.finalize_creation(&character).await.expect("second"),
            FinalizeOutcome::AlreadyPresent
        );

        let state = db.get_world_state().await.expect("world");
        assert_eq!(state.total_characters, 1);
        let intent = db
            .get_creation_intent("cr_1")
            .await
            .expect("query")
            .expect("intent exists");
        assert_eq!(intent.status(), IntentStatus::Completed);
        let events = db.list_world_events(10).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "character_spawn");
    }

    #[tokio::test]
    async fn failed_intent_is_never_finalized() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let character = sample_character("cr_1", "u1");
        db.insert_creation_intent("2026-01-01", &character)
            .await
            .expect("intent");
        assert!(db.mark_intent_failed("cr_1", "abandoned").await.expect("fail"));

        assert!(!db.mark_intent_blob_stored(&character).await.expect("blob_stored"));
        assert_eq!(
            db.finalize_creation(&character).await.expect("finalize"),
            FinalizeOutcome::Abandoned
        );

        assert!(db.get_character("cr_1").await.expect("query").is_none());
        assert_eq!(db.get_world_state().await.expect("world").total_characters, 0);
        assert!(db.list_world_events(10).await.expect("events").is_empty());
        let intent = db
            .get_creation_intent("cr_1")
            .await
            .expect("query")
            .expect("intent exists");
        assert_eq!(intent.status(), IntentStatus::Failed);
    }

    #[tokio::test]
    async fn stored_intent_cannot_be_failed() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let character = sample_character("cr_1", "u1");
        db.insert_creation_intent("2026-01-01", &character)
            .await
            .expect("intent");
        assert!(db.mark_intent_blob_stored(&character).await.expect("blob_stored"));
        assert!(!db.mark_intent_failed("cr_1", "late").await.expect("fail"));
        let intent = db
            .get_creation_intent("cr_1")
            .await
            .expect("query")
            .expect("intent exists");
        assert_eq!(intent.status(), IntentStatus::BlobStored);
    }

    #[tokio::test]
    async fn apply_water_bumps_counters() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let character = sample_character("cr_1", "u1");
        db.insert_creation_intent("2026-01-01", &character)
            .await
            .expect("intent");
        db.finalize_creation(&character).await.expect("finalize");

        let (before, after) = db
            .apply_water("cr_1", |level, _| level + 1)
            .await
            .expect("water")
            .expect("exists");
        assert_eq!(before.water_count, 0);
        assert_eq!(after.water_count, 1);
        assert_eq!(after.level, 2);
        assert_eq!(db.get_world_state().await.expect("world").total_waters, 1);

        assert!(db
            .apply_water("missing", |level, _| level)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn stale_intents_exclude_terminal_rows() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let pending = sample_character("cr_pending", "u1");
        let failed = sample_character("cr_failed", "u1");
        db.insert_creation_intent("2026-01-01", &pending).await.expect("pending");
        db.insert_creation_intent("2026-01-01", &failed).await.expect("failed");
        db.mark_intent_failed("cr_failed", "boom").await.expect("mark");

        let stale = db
            .list_stale_intents(Utc::now() + chrono::Duration::seconds(5), 10)
            .await
            .expect("stale");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "cr_pending");
        assert_eq!(stale[0].payload.0, pending);
    }

    #[tokio::test]
    async fn expired_sessions_are_deleted() {
        let db = test_database().await;
        db.create_user(&sample_user("u1", "fern")).await.expect("user");
        let now = Utc::now();
        let session = Session {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            token_hash: "h".to_string(),
            expires_at: now - chrono::Duration::minutes(1),
            created_at: now - chrono::Duration::hours(1),
        };
        db.create_session(&session).await.expect("session");
        assert_eq!(db.delete_expired_sessions(now).await.expect("delete"), 1);
        assert!(db.get_session("s1").await.expect("query").is_none());
    }
}
