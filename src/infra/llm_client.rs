use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::app::ports::LanguageModel;
use crate::config::ExtractorSettings;
use crate::error::{IngestError, Result};

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatCompletionsModel {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsModel {
    pub fn new(api_key: impl Into<String>, settings: &ExtractorSettings) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    async fn extract(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
        });

        let resp = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| IngestError::AiExtraction(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(IngestError::AiExtraction(format!(
                "model endpoint returned HTTP {}: {}",
                status.as_u16(),
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| IngestError::AiExtraction(format!("unreadable response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| IngestError::AiExtraction("response had no content".into()))?;

        debug!(model = %self.model, chars = content.len(), "Model response received");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let settings = ExtractorSettings { api_base: "https://llm.test/v1/".into(), ..Default::default() };
        let model = ChatCompletionsModel::new("key", &settings);
        assert_eq!(model.base_url, "https://llm.test/v1");
        assert_eq!(model.model_name(), settings.model);
    }

    #[test]
    fn test_response_without_content_parses_to_none() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());

        let parsed: ChatResponse =
            serde_json::from_str(r#"{"id":"x","choices":[{"message":{"content":"{\"events\":[]}"}}]}"#).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some(r#"{"events":[]}"#));
    }
}
