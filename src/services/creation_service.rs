use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::Config,
    constants::{
        CREATION_ID_PREFIX, DEFAULT_CHARACTER_NAME, IMAGE_CACHE_CONTROL, IMAGE_CONTENT_TYPE,
        LEGENDARY_ODDS, MAX_LEVEL, MAX_PROMPT_CHARS, MIN_LEVEL,
    },
    db::{Database, FinalizeOutcome},
    error::{AppError, Result},
    models::{CanCreateResponse, Character, CreateCreationRequest, IntentStatus, RealtimeEvent, User},
    services::{
        character_service::normalize_name, day_key, generate_sprite, next_utc_midnight,
        retry_world_write, DailyLimiter, ImageGenerator, RetryPolicy, WorldHub, WorldService,
    },
    storage::{Blob, BlobMetadata, BlobStore, KvNamespace},
};

pub fn new_creation_id() -> String {
    format!("{}{}", CREATION_ID_PREFIX, Uuid::new_v4().simple())
}

/// `cr_` followed by 32 lowercase hex digits.
pub fn is_valid_creation_id(id: &str) -> bool {
    id.strip_prefix(CREATION_ID_PREFIX).is_some_and(|rest| {
        rest.len() == 32 && rest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    })
}

pub fn blob_key(creation_id: &str) -> String {
    format!("{}.png", creation_id)
}

fn roll_legendary() -> bool {
    rand::rng().random_range(0..LEGENDARY_ODDS) == 0
}

/// Prompt sent to the image provider.
pub fn sprite_prompt(name: &str, flavor: &str, level: i64, legendary: bool) -> String {
    let mut prompt = format!(
        "pixel art sprite of {}, a level {} sprout creature, {}, centered, plain white background, game asset",
        name, level, flavor
    );
    if legendary {
        prompt.push_str(", legendary, radiant golden aura, sparkling particles");
    }
    prompt
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: usize,
    pub failed: usize,
}

enum Reconciled {
    Completed,
    Failed,
    /// The live request moved the intent on first.
    Skipped,
}

fn abandoned(id: &str) -> AppError {
    AppError::Conflict(format!(
        "Creation {} expired before it finished. Please try again",
        id
    ))
}

/// Runs the creation saga: daily slot, outbox intent, image, blob,
/// then one finalize transaction that is safe to repeat.
#[derive(Clone)]
pub struct CreationService {
    db: Database,
    creations: KvNamespace,
    limiter: DailyLimiter,
    blobs: Arc<dyn BlobStore>,
    generator: Arc<dyn ImageGenerator>,
    hub: WorldHub,
    world_cache: KvNamespace,
    config: Config,
    retry: RetryPolicy,
}

impl CreationService {
    pub fn new(
        db: Database,
        cache: KvNamespace,
        creations: KvNamespace,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn ImageGenerator>,
        hub: WorldHub,
        config: Config,
    ) -> Self {
        Self {
            db,
            creations,
            limiter: DailyLimiter::new(cache.clone()),
            blobs,
            generator,
            hub,
            world_cache: cache,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn world(&self) -> WorldService {
        WorldService::new(self.db.clone(), self.world_cache.clone(), self.hub.clone())
    }

    pub async fn can_create(&self, user_id: &str) -> Result<CanCreateResponse> {
        self.limiter.can_create(user_id).await
    }

    // ==================== CREATE ====================
    pub async fn create(&self, user: &User, req: CreateCreationRequest) -> Result<Character> {
        let name = match req.name.as_deref() {
            Some(raw) => normalize_name(raw)?,
            None => DEFAULT_CHARACTER_NAME.to_string(),
        };
        let level = req.level.unwrap_or(MIN_LEVEL);
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(AppError::BadRequest(format!(
                "Level must be between {} and {}",
                MIN_LEVEL, MAX_LEVEL
            )));
        }
        let flavor = req
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("a cheerful seedling with two leaves")
            .to_string();
        if flavor.chars().count() > MAX_PROMPT_CHARS {
            return Err(AppError::BadRequest(format!(
                "Prompt must be at most {} characters",
                MAX_PROMPT_CHARS
            )));
        }

        let id = new_creation_id();
        let now = Utc::now();
        let day = day_key(now);

        if !self
            .limiter
            .check_daily_rate_limit(&user.id, &id, now)
            .await?
        {
            return Err(AppError::RateLimitExceeded(format!(
                "Daily creation limit reached. Try again after {}",
                next_utc_midnight(now).to_rfc3339()
            )));
        }

        let is_legendary = roll_legendary();
        let mut character = Character {
            id: id.clone(),
            owner_user_id: user.id.clone(),
            wallet_address: user.solana_address.clone(),
            name: name.clone(),
            level,
            water_count: 0,
            is_legendary,
            image_url: self.config.image_url(&id),
            prompt: sprite_prompt(&name, &flavor, level, is_legendary),
            seed: None,
            background_removed: false,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.db.insert_creation_intent(&day, &character).await {
            self.release_slot(&user.id, &day).await;
            return Err(err);
        }
        tracing::info!(
            "Creation started id={} user_id={} legendary={}",
            id,
            user.id,
            is_legendary
        );

        let sprite =
            match generate_sprite(self.generator.as_ref(), &character.prompt, self.retry).await {
                Ok(sprite) => sprite,
                Err(err) => {
                    match self.db.mark_intent_failed(&id, &err.to_string()).await {
                        Ok(true) => self.release_slot(&user.id, &day).await,
                        // The reconciler failed it and gave the slot back already.
                        Ok(false) => {
                            tracing::warn!("Creation {} was reconciled while generating", id)
                        }
                        Err(e) => {
                            tracing::error!("Failed to mark intent {} failed: {}", id, e);
                            self.release_slot(&user.id, &day).await;
                        }
                    }
                    return Err(match err {
                        AppError::ExternalAPI(msg) => AppError::ExternalAPI(msg),
                        other => AppError::ExternalAPI(other.to_string()),
                    });
                }
            };
        character.seed = sprite.seed;
        character.background_removed = sprite.background_removed;

        if let Err(err) = self.store_image(&id, &sprite.bytes).await {
            if let Err(e) = self.db.record_intent_error(&id, &err.to_string()).await {
                tracing::warn!("Failed to record error on intent {}: {}", id, e);
            }
            return Err(err);
        }
        if !self.db.mark_intent_blob_stored(&character).await? {
            tracing::warn!("Creation {} was abandoned before its image was stored", id);
            self.discard_image(&id).await;
            return Err(abandoned(&id));
        }

        if self.finalize(&character).await? == FinalizeOutcome::Abandoned {
            self.discard_image(&id).await;
            return Err(abandoned(&id));
        }
        Ok(character)
    }

    async fn store_image(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let metadata = BlobMetadata {
            content_type: IMAGE_CONTENT_TYPE.to_string(),
            cache_control: IMAGE_CACHE_CONTROL.to_string(),
        };
        self.blobs.put(&blob_key(id), bytes, &metadata).await
    }

    async fn discard_image(&self, id: &str) {
        if let Err(e) = self.blobs.delete(&blob_key(id)).await {
            tracing::warn!("Failed to delete image of abandoned creation {}: {}", id, e);
        }
    }

    async fn release_slot(&self, user_id: &str, day: &str) {
        if let Err(e) = self.limiter.release(user_id, day).await {
            tracing::error!("Failed to release daily slot user_id={}: {}", user_id, e);
        }
    }

    /// Commits the SQL side, then writes the KV record. Repeating it for the
    /// same creation never double-counts, and a failed intent is left alone.
    pub async fn finalize(&self, character: &Character) -> Result<FinalizeOutcome> {
        let outcome =
            retry_world_write("finalize creation", || self.db.finalize_creation(character))
                .await?;
        if outcome == FinalizeOutcome::Abandoned {
            return Ok(outcome);
        }

        // `get` rebuilds a missing record from SQL.
        if let Err(e) = self.creations.put_json(&character.id, character, None).await {
            tracing::warn!("Creation KV write failed id={}: {}", character.id, e);
        }

        self.world().invalidate_cache().await;
        if outcome == FinalizeOutcome::Inserted {
            tracing::info!("Creation completed id={}", character.id);
            self.hub.publish(RealtimeEvent::CharacterSpawn {
                character: character.clone(),
            });
        }
        Ok(outcome)
    }

    // ==================== READ / UPDATE ====================
    pub async fn get(&self, id: &str) -> Result<Character> {
        if !is_valid_creation_id(id) {
            return Err(AppError::NotFound("Creation not found".to_string()));
        }
        match self.creations.get_json::<Character>(id).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(e) => tracing::warn!("Creation KV read failed id={}: {}", id, e),
        }

        let character = self
            .db
            .get_character(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Creation not found".to_string()))?;
        if let Err(e) = self.creations.put_json(id, &character, None).await {
            tracing::warn!("Creation KV repair failed id={}: {}", id, e);
        }
        Ok(character)
    }

    pub async fn image(&self, id: &str) -> Result<Blob> {
        if !is_valid_creation_id(id) {
            return Err(AppError::NotFound("Image not found".to_string()));
        }
        self.blobs
            .get(&blob_key(id))
            .await?
            .ok_or_else(|| AppError::NotFound("Image not found".to_string()))
    }

    pub async fn rename(&self, user_id: &str, id: &str, name: &str) -> Result<Character> {
        let name = normalize_name(name)?;
        let character = self
            .db
            .get_character(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Creation not found".to_string()))?;
        if character.owner_user_id != user_id {
            return Err(AppError::Forbidden(
                "Only the owner can rename this creation".to_string(),
            ));
        }

        let updated = self
            .db
            .rename_character(id, &name)
            .await?
            .ok_or_else(|| AppError::NotFound("Creation not found".to_string()))?;
        if let Err(e) = self.creations.put_json(id, &updated, None).await {
            tracing::warn!("Creation KV update failed id={}: {}", id, e);
        }

        self.hub.publish(RealtimeEvent::CharacterRenamed {
            character_id: updated.id.clone(),
            name: updated.name.clone(),
        });
        Ok(updated)
    }

    // ==================== RECONCILIATION ====================
    /// Drives intents untouched since `before` to a terminal state.
    pub async fn reconcile_stale(&self, before: DateTime<Utc>, limit: i64) -> Result<ReconcileReport> {
        let intents = self.db.list_stale_intents(before, limit).await?;
        let mut report = ReconcileReport::default();

        for intent in intents {
            tracing::debug!(
                "Reconciling creation id={} status={} started={} touched={} last_error={:?}",
                intent.id,
                intent.status,
                intent.created_at,
                intent.updated_at,
                intent.error
            );
            let character = &intent.payload.0;
            let outcome = match intent.status() {
                IntentStatus::BlobStored => self.reconcile_finalize(character).await,
                IntentStatus::Pending => match self.blobs.exists(&blob_key(&intent.id)).await {
                    Ok(true) => match self.db.mark_intent_blob_stored(character).await {
                        Ok(true) => self.reconcile_finalize(character).await,
                        Ok(false) => Ok(Reconciled::Skipped),
                        Err(e) => Err(e),
                    },
                    Ok(false) => {
                        match self
                            .db
                            .mark_intent_failed(&intent.id, "abandoned before the image was stored")
                            .await
                        {
                            Ok(true) => {
                                self.release_slot(&intent.user_id, &intent.day).await;
                                Ok(Reconciled::Failed)
                            }
                            Ok(false) => Ok(Reconciled::Skipped),
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                },
                IntentStatus::Completed | IntentStatus::Failed => continue,
            };

            match outcome {
                Ok(Reconciled::Completed) => {
                    tracing::info!("Reconciled creation id={}", intent.id);
                    report.completed += 1;
                }
                Ok(Reconciled::Failed) => {
                    tracing::warn!("Abandoned creation id={} marked failed", intent.id);
                    report.failed += 1;
                }
                Ok(Reconciled::Skipped) => {
                    tracing::debug!("Creation id={} moved on during reconciliation", intent.id);
                }
                Err(e) => {
                    tracing::error!("Reconciliation of {} failed: {}", intent.id, e);
                    if let Err(e) = self.db.record_intent_error(&intent.id, &e.to_string()).await {
                        tracing::warn!("Failed to record error on intent {}: {}", intent.id, e);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_finalize(&self, character: &Character) -> Result<Reconciled> {
        Ok(match self.finalize(character).await? {
            FinalizeOutcome::Abandoned => Reconciled::Skipped,
            FinalizeOutcome::Inserted | FinalizeOutcome::AlreadyPresent => Reconciled::Completed,
        })
    }
}
