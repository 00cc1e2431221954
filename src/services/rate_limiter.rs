use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::{
    constants::{DAILY_CREATION_LIMIT_PREFIX, DAILY_WATER_PREFIX},
    error::Result,
    models::CanCreateResponse,
    storage::KvNamespace,
};

/// UTC calendar date used to bucket daily allowances.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Seconds until the bucket rolls over, never less than one.
pub fn ttl_until_midnight(now: DateTime<Utc>) -> u64 {
    let remaining = (next_utc_midnight(now) - now).num_seconds();
    u64::try_from(remaining).unwrap_or(0).max(1)
}

/// Once-per-UTC-day allowances backed by atomic KV conditional writes.
#[derive(Clone)]
pub struct DailyLimiter {
    cache: KvNamespace,
}

impl DailyLimiter {
    pub fn new(cache: KvNamespace) -> Self {
        Self { cache }
    }

    fn creation_key(user_id: &str, day: &str) -> String {
        format!("{}:{}:{}", DAILY_CREATION_LIMIT_PREFIX, user_id, day)
    }

    fn water_key(user_id: &str, character_id: &str, day: &str) -> String {
        format!("{}:{}:{}:{}", DAILY_WATER_PREFIX, user_id, character_id, day)
    }

    /// Claims the creation slot for the UTC day of `now`. `true` means the
    /// caller may proceed.
    pub async fn check_daily_rate_limit(
        &self,
        user_id: &str,
        creation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = Self::creation_key(user_id, &day_key(now));
        let granted = self
            .cache
            .put_if_absent(&key, creation_id, ttl_until_midnight(now))
            .await?;
        if !granted {
            tracing::info!("Daily creation limit reached user_id={}", user_id);
        }
        Ok(granted)
    }

    /// Read-only check; does not consume the slot.
    pub async fn can_create(&self, user_id: &str) -> Result<CanCreateResponse> {
        self.can_create_at(user_id, Utc::now()).await
    }

    pub async fn can_create_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CanCreateResponse> {
        let taken = self
            .cache
            .get(&Self::creation_key(user_id, &day_key(now)))
            .await?
            .is_some();
        Ok(CanCreateResponse {
            can_create: !taken,
            resets_at: next_utc_midnight(now),
        })
    }

    /// Gives back a slot claimed on `day`.
    pub async fn release(&self, user_id: &str, day: &str) -> Result<()> {
        tracing::info!("Releasing daily creation slot user_id={} day={}", user_id, day);
        self.cache.delete(&Self::creation_key(user_id, day)).await
    }

    /// Claims today's watering of one character by one user.
    pub async fn claim_water(&self, user_id: &str, character_id: &str) -> Result<bool> {
        let now = Utc::now();
        let key = Self::water_key(user_id, character_id, &day_key(now));
        self.cache
            .put_if_absent(&key, "1", ttl_until_midnight(now))
            .await
    }

    pub async fn release_water(&self, user_id: &str, character_id: &str) -> Result<()> {
        let key = Self::water_key(user_id, character_id, &day_key(Utc::now()));
        self.cache.delete(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn limiter() -> DailyLimiter {
        DailyLimiter::new(KvNamespace::new(Arc::new(MemoryKv::new()), "cache"))
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).single().expect("valid time")
    }

    #[test]
    fn ttl_runs_to_next_utc_midnight() {
        assert_eq!(ttl_until_midnight(at(2026, 3, 1, 23, 59, 0)), 60);
        assert_eq!(ttl_until_midnight(at(2026, 3, 1, 0, 0, 0)), 86_400);
        assert_eq!(next_utc_midnight(at(2026, 12, 31, 12, 0, 0)), at(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn day_key_is_utc_date() {
        assert_eq!(day_key(at(2026, 3, 1, 23, 59, 59)), "2026-03-01");
    }

    #[tokio::test]
    async fn denies_second_request_same_day() {
        let limiter = limiter();
        let now = at(2026, 3, 1, 9, 0, 0);
        assert!(limiter.check_daily_rate_limit("u1", "cr_a", now).await.expect("first"));
        assert!(!limiter
            .check_daily_rate_limit("u1", "cr_b", now + Duration::hours(2))
            .await
            .expect("second"));
        // other users are unaffected
        assert!(limiter.check_daily_rate_limit("u2", "cr_c", now).await.expect("other"));
    }

    #[tokio::test]
    async fn allows_again_on_next_utc_date() {
        let limiter = limiter();
        let today = at(2026, 3, 1, 23, 0, 0);
        assert!(limiter.check_daily_rate_limit("u1", "cr_a", today).await.expect("today"));
        let tomorrow = at(2026, 3, 2, 0, 30, 0);
        assert!(limiter
            .check_daily_rate_limit("u1", "cr_b", tomorrow)
            .await
            .expect("tomorrow"));
    }

    #[tokio::test]
    async fn concurrent_acquisitions_grant_exactly_one() {
        let limiter = limiter();
        let now = at(2026, 3, 1, 12, 0, 0);
        let mut handles = Vec::new();
        for i in 0..16 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_daily_rate_limit("u1", &format!("cr_{}", i), now)
                    .await
                    .expect("limiter")
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("join") {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn release_returns_the_slot() {
        let limiter = limiter();
        let now = at(2026, 3, 1, 12, 0, 0);
        assert!(limiter.check_daily_rate_limit("u1", "cr_a", now).await.expect("grant"));
        assert!(!limiter.can_create_at("u1", now).await.expect("can_create").can_create);
        limiter.release("u1", "2026-03-01").await.expect("release");
        let status = limiter.can_create_at("u1", now).await.expect("can_create");
        assert!(status.can_create);
        assert_eq!(status.resets_at, at(2026, 3, 2, 0, 0, 0));
    }

    #[tokio::test]
    async fn water_claims_are_per_character() {
        let limiter = limiter();
        assert!(limiter.claim_water("u1", "cr_a").await.expect("first"));
        assert!(!limiter.claim_water("u1", "cr_a").await.expect("repeat"));
        assert!(limiter.claim_water("u1", "cr_b").await.expect("other character"));
        limiter.release_water("u1", "cr_a").await.expect("release");
        assert!(limiter.claim_water("u1", "cr_a").await.expect("after release"));
    }
}
