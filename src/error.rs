use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch of {url} timed out after {timeout_ms}ms")]
    FetchTimeout { url: String, timeout_ms: u64 },

    #[error("Fetch of {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("AI extraction failed: {0}")]
    AiExtraction(String),

    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl IngestError {
    /// Datastore failures abort the whole run; everything else is charged to a single source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Datastore(_))
    }

    /// Short stable label used for metrics and the registry's `last_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Http(_) => "http",
            IngestError::Json(_) => "json",
            IngestError::Toml(_) => "toml",
            IngestError::Io(_) => "io",
            IngestError::Env(_) => "env",
            IngestError::Config(_) => "config",
            IngestError::FetchTimeout { .. } => "FetchTimeout",
            IngestError::Fetch { .. } => "FetchError",
            IngestError::AiExtraction(_) => "AIExtractionError",
            IngestError::Datastore(_) => "datastore",
            IngestError::SourceNotFound(_) => "source_not_found",
            IngestError::Worker(_) => "worker",
        }
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::Datastore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
