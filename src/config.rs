use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{IngestError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineSettings,
    pub signal: SignalSettings,
    pub extractor: ExtractorSettings,
    pub verifier: VerifierSettings,
    pub validator: ValidatorSettings,
    pub registry: RegistrySettings,
    pub health: HealthSettings,
    pub alert: AlertSettings,
    pub datastore: DatastoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub inter_batch_pause_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Paths tried after the source URL itself, in order. "" means the URL as registered.
    pub candidate_paths: Vec<String>,
    /// Booking systems whose pages publish the full recurring schedule each run.
    pub refresh_booking_systems: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            inter_batch_pause_secs: DEFAULT_INTER_BATCH_PAUSE_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            candidate_paths: vec![
                String::new(),
                "/schedule".to_string(),
                "/classes".to_string(),
                "/events".to_string(),
            ],
            refresh_booking_systems: vec![
                "mindbody".to_string(),
                "wellnessliving".to_string(),
                "janeapp".to_string(),
                "momence".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub threshold: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self { threshold: DEFAULT_SIGNAL_THRESHOLD }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub min_interval_ms: u64,
    pub model: String,
    pub api_base: String,
    /// Name of the environment variable holding the API key, never the key itself.
    pub api_key_env: String,
    pub max_page_chars: usize,
    pub timeout_secs: u64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_EXTRACTOR_MIN_INTERVAL_MS,
            model: DEFAULT_EXTRACTOR_MODEL.to_string(),
            api_base: DEFAULT_EXTRACTOR_API_BASE.to_string(),
            api_key_env: DEFAULT_EXTRACTOR_API_KEY_ENV.to_string(),
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
            timeout_secs: DEFAULT_EXTRACTOR_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    pub min_match_ratio: f64,
    pub require_source_quote: bool,
    pub min_title_len: usize,
    pub max_title_len: usize,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            min_match_ratio: DEFAULT_MIN_MATCH_RATIO,
            require_source_quote: true,
            min_title_len: MIN_TITLE_LEN,
            max_title_len: MAX_TITLE_LEN,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    /// Groups of more than this many candidates on one (date, time, venue) slot are dropped.
    pub cluster_threshold: usize,
    /// Calendar months after today still accepted as a start date.
    pub max_future_months: u32,
    pub placeholder_dates: Vec<String>,
    pub placeholder_times: Vec<String>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            max_future_months: DEFAULT_MAX_FUTURE_MONTHS,
            placeholder_dates: vec![
                "1970-01-01".to_string(),
                "1900-01-01".to_string(),
                "2000-01-01".to_string(),
                "2099-12-31".to_string(),
                "9999-12-31".to_string(),
            ],
            placeholder_times: vec![
                "00:00".to_string(),
                "09:00".to_string(),
                "12:00".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub failure_threshold: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub stale_high_hours: i64,
    pub stale_medium_hours: i64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            stale_high_hours: DEFAULT_STALE_HIGH_HOURS,
            stale_medium_hours: DEFAULT_STALE_MEDIUM_HOURS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatastoreSettings {
    pub path: PathBuf,
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_DATASTORE_PATH) }
    }
}

impl AppConfig {
    /// Load from `path` (or `config.toml`), falling back to defaults when the file is absent,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let explicit = path.is_some();
        let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path).map_err(|e| {
                IngestError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&content)?
        } else if explicit {
            return Err(IngestError::Config(format!(
                "Config file '{}' does not exist",
                config_path.display()
            )));
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_ALERT_WEBHOOK_URL) {
            if !url.trim().is_empty() {
                self.alert.webhook_url = Some(url);
            }
        }
        if let Ok(path) = std::env::var(ENV_DATASTORE_PATH) {
            if !path.trim().is_empty() {
                self.datastore.path = PathBuf::from(path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(IngestError::Config("pipeline.batch_size must be at least 1".into()));
        }
        if self.pipeline.concurrency == 0 {
            return Err(IngestError::Config("pipeline.concurrency must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.verifier.min_match_ratio) {
            return Err(IngestError::Config(
                "verifier.min_match_ratio must be between 0.0 and 1.0".into(),
            ));
        }
        if self.verifier.min_title_len > self.verifier.max_title_len {
            return Err(IngestError::Config(
                "verifier.min_title_len exceeds verifier.max_title_len".into(),
            ));
        }
        Ok(())
    }

    /// Reads the extractor API key from the configured environment variable.
    pub fn extractor_api_key(&self) -> Result<String> {
        std::env::var(&self.extractor.api_key_env).map_err(|_| {
            IngestError::Config(format!("{} not set", self.extractor.api_key_env))
        })
    }
}
