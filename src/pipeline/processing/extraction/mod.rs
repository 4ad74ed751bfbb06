//! AI extraction: turns page text into untrusted candidate records.

pub mod rate_limiter;

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::LanguageModel;
use crate::domain::CandidateRecord;
use crate::error::{IngestError, Result};
use crate::observability::metrics;

pub use rate_limiter::RateLimiter;

const SYSTEM_PROMPT: &str = "\
You extract scheduled listings (classes, events, workshops, deals) from the text of a business web page.\n\n\
Rules:\n\
- Only report listings that are explicitly present in the page text. Never invent or generalize.\n\
- If the page lists nothing, return {\"events\": []}. An empty list is a correct answer.\n\
- Every listing MUST include `source_quote`: a verbatim excerpt copied from the page text that states the listing.\n\
- `title` is the listing's own name as written on the page, not the business name and not a category.\n\
- `date` is YYYY-MM-DD. `time` and `end_time` are 24-hour HH:MM. Use null when not stated.\n\
- `confidence` is a number between 0 and 1.\n\n\
Respond with JSON only: {\"events\": [{\"title\", \"date\", \"time\", \"end_time\", \"description\", \
\"venue_name\", \"source_quote\", \"confidence\"}]}";

fn response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["events"],
        "properties": {
            "events": {
                "type": "array",
                "items": { "type": "object" }
            }
        }
    })
}

/// Rate-limited wrapper around the language-model collaborator.
pub struct AiExtractor {
    model: Arc<dyn LanguageModel>,
    limiter: Arc<RateLimiter>,
    max_page_chars: usize,
    schema: JSONSchema,
}

impl AiExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, limiter: Arc<RateLimiter>, max_page_chars: usize) -> Result<Self> {
        let schema_doc = response_schema();
        let schema = JSONSchema::compile(&schema_doc)
            .map_err(|e| IngestError::Config(format!("invalid extraction schema: {e}")))?;
        Ok(Self { model, limiter, max_page_chars, schema })
    }

    /// Errors are logged and counted here; the caller decides whether a page or the whole source failed.
    pub async fn extract(
        &self,
        page_text: &str,
        business_name: &str,
        source_url: &str,
    ) -> Result<Vec<CandidateRecord>> {
        let waited = self.limiter.acquire().await;
        metrics::extractor::wait_recorded(waited.as_secs_f64());

        let prompt = build_user_prompt(page_text, business_name, source_url, self.max_page_chars);
        let response = self.model.extract(SYSTEM_PROMPT, &prompt).await;
        let candidates = match response.and_then(|raw| parse_candidates(&raw, &self.schema)) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(url = source_url, error = %e, code = e.kind(), "Extraction failed");
                metrics::extractor::call_failed();
                return Err(e);
            }
        };

        info!(
            url = source_url,
            model = self.model.model_name(),
            candidates = candidates.len(),
            "Extraction completed"
        );
        metrics::extractor::call_succeeded(candidates.len());
        Ok(candidates)
    }
}

pub fn build_user_prompt(page_text: &str, business_name: &str, source_url: &str, max_chars: usize) -> String {
    let truncated: String = page_text.chars().take(max_chars).collect();
    format!("Business: {business_name}\nPage URL: {source_url}\n\nPage text:\n\"\"\"\n{truncated}\n\"\"\"")
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop an optional language tag on the opening fence
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a raw model response. The envelope must be well-formed; individual items that
/// do not look like candidates are dropped rather than failing the page.
pub fn parse_candidates(raw: &str, schema: &JSONSchema) -> Result<Vec<CandidateRecord>> {
    let body = strip_code_fences(raw);
    let mut value: Value = serde_json::from_str(body)
        .map_err(|e| IngestError::AiExtraction(format!("response is not JSON: {e}")))?;

    if value.is_array() {
        value = json!({ "events": value });
    }

    if let Err(errors) = schema.validate(&value) {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(IngestError::AiExtraction(format!(
            "response has unexpected shape: {}",
            messages.join("; ")
        )));
    }

    let items = match value.get_mut("events").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut candidates = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<CandidateRecord>(item) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => debug!("Dropping malformed candidate {}: {}", i, e),
        }
    }
    Ok(candidates)
}
