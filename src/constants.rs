/// Application constants

// API version
pub const API_VERSION: &str = "v1";

// KV namespaces
pub const KV_NAMESPACE_CACHE: &str = "cache";
pub const KV_NAMESPACE_CREATIONS: &str = "creations";

// KV keys (inside the cache namespace)
pub const WORLD_STATE_CACHE_KEY: &str = "world_state";
pub const WORLD_STATE_CACHE_TTL_SECS: u64 = 60;
pub const DAILY_CREATION_LIMIT_PREFIX: &str = "daily_creation_limit";
pub const DAILY_WATER_PREFIX: &str = "daily_water";

// Session cookie
pub const SESSION_COOKIE_NAME: &str = "session";
pub const MAX_SESSION_TTL_HOURS: u64 = 24 * 365;

// Creation ids
pub const CREATION_ID_PREFIX: &str = "cr_";

// Image generation
pub const IMAGE_GENERATION_MAX_ATTEMPTS: u32 = 3;
pub const IMAGE_GENERATION_BACKOFF_BASE_MS: u64 = 1_000;
pub const IMAGE_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const IMAGE_CONTENT_TYPE: &str = "image/png";
pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

// World counters
pub const WORLD_COUNTER_MAX_ATTEMPTS: u32 = 3;
pub const WORLD_COUNTER_BACKOFF_MS: u64 = 100;

// Characters
pub const MIN_LEVEL: i64 = 1;
pub const MAX_LEVEL: i64 = 5;
pub const MAX_NAME_CHARS: usize = 32;
pub const MAX_PROMPT_CHARS: usize = 500;
pub const DEFAULT_CHARACTER_NAME: &str = "Sprout";
pub const LEGENDARY_ODDS: u32 = 100; // 1 in 100
/// (level, waters required), ascending
pub const EVOLUTION_THRESHOLDS: [(i64, i64); 4] = [(2, 3), (3, 7), (4, 15), (5, 30)];

// Lore
pub const MAX_LORE_CHARS: usize = 1_000;
pub const LORE_DEFAULT_LIMIT: u32 = 50;

// World events
pub const WORLD_EVENTS_DEFAULT_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

// Milestones
pub const CHARACTER_MILESTONES: [i64; 5] = [1, 10, 100, 1_000, 10_000];
pub const WATER_MILESTONES: [i64; 5] = [10, 100, 1_000, 10_000, 100_000];
pub const WORLD_PHASES: [&str; 4] = ["dawn", "bloom", "harvest", "dusk"];

// Auth
pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_PASSWORD_CHARS: usize = 128;

// WebSocket configuration
pub const WS_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const WS_CLIENT_TIMEOUT_SECS: u64 = 60;
pub const WORLD_HUB_CAPACITY: usize = 256;

// Background service intervals
pub const RECONCILE_INTERVAL_SECS: u64 = 60;
pub const RECONCILE_STALE_AFTER_SECS: i64 = 300;
pub const RECONCILE_BATCH_SIZE: i64 = 50;
