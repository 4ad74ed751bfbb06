use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::Source;
use crate::error::{IngestError, Result};

/// On-disk shape of a hand-curated source (`registry/sources/*.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub source_id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub booking_system: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceSpec {
    /// Curated sources are always verified.
    pub fn into_source(self) -> Source {
        let mut source = Source::new(&self.source_id, &self.name, &self.url);
        source.booking_system = self.booking_system.filter(|s| !s.trim().is_empty());
        source.identifier = self.identifier.filter(|s| !s.trim().is_empty());
        source.priority = self.priority;
        source.is_active = self.enabled;
        source.notes = self.notes;
        source
    }
}

pub fn load_source_spec(path: &Path) -> Result<SourceSpec> {
    let raw = fs::read_to_string(path)?;
    let spec: SourceSpec = serde_json::from_str(&raw)
        .map_err(|e| IngestError::Config(format!("invalid source file '{}': {}", path.display(), e)))?;
    if spec.source_id.trim().is_empty() || spec.url.trim().is_empty() {
        return Err(IngestError::Config(format!(
            "source file '{}' needs a source_id and url",
            path.display()
        )));
    }
    Ok(spec)
}

/// Loads every `*.json` file in `dir`, in file-name order.
pub fn load_sources_from_dir(dir: &Path) -> Result<Vec<Source>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let spec = load_source_spec(&path)?;
        debug!("Loaded source {} from {}", spec.source_id, path.display());
        sources.push(spec.into_source());
    }
    info!("Loaded {} source definitions from {}", sources.len(), dir.display());
    Ok(sources)
}
