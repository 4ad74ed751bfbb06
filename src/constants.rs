/// Defaults shared by config, the pipeline and the health sweep.
/// Keep these in one place so the CLI help, config defaults and tests agree.

// Pipeline scheduling
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_INTER_BATCH_PAUSE_SECS: u64 = 30;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

// AI extractor
pub const DEFAULT_EXTRACTOR_MIN_INTERVAL_MS: u64 = 1500;
pub const DEFAULT_EXTRACTOR_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EXTRACTOR_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_EXTRACTOR_API_KEY_ENV: &str = "LLM_API_KEY";
pub const DEFAULT_MAX_PAGE_CHARS: usize = 24_000;
pub const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 60;

// Signal detector
pub const DEFAULT_SIGNAL_THRESHOLD: f64 = 2.0;

// Source verifier
pub const DEFAULT_MIN_MATCH_RATIO: f64 = 0.8;
pub const MIN_TITLE_LEN: usize = 3;
pub const MAX_TITLE_LEN: usize = 200;

// Event validator
pub const DEFAULT_CLUSTER_THRESHOLD: usize = 3;
pub const DEFAULT_MAX_FUTURE_MONTHS: u32 = 24;
pub const NEEDS_TIME_REVIEW_TAG: &str = "needs-time-review";

// Source registry and health
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_STALE_HIGH_HOURS: i64 = 48;
pub const DEFAULT_STALE_MEDIUM_HOURS: i64 = 24;

// Datastore
pub const DEFAULT_DATASTORE_PATH: &str = "data/listings.db";

// Environment overrides
pub const ENV_ALERT_WEBHOOK_URL: &str = "ALERT_WEBHOOK_URL";
pub const ENV_DATASTORE_PATH: &str = "LISTING_DB_PATH";
pub const ENV_METRICS_ADDR: &str = "LISTING_METRICS_ADDR";
