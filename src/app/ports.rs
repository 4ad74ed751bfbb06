use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

// Page-fetch side

/// What the fetcher should wait for before returning. Plain HTTP fetchers treat every
/// variant as `Load`; headless renderers can honour the others.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum WaitCondition {
    #[default]
    Load,
    NetworkIdle,
    Selector(String),
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub wait_condition: WaitCondition,
}

impl FetchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout, wait_condition: WaitCondition::Load }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage>;
}

// Language-model side

/// Untrusted extraction backend: returns raw JSON text for a prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn extract(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

// Alerting side

/// Best-effort alert delivery. Failures are reported as `false`, never as errors.
#[async_trait]
pub trait AlertGateway: Send + Sync {
    async fn send(&self, message: &str) -> bool;
}
