use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use scraper::Html;
use std::time::Duration;
use tracing::{debug, warn};

use crate::app::ports::{FetchOptions, FetchedPage, PageFetcher};
use crate::error::{IngestError, Result};

const USER_AGENT: &str = concat!("listing_ingest/", env!("CARGO_PKG_VERSION"));
const ELEMENTS_WITHOUT_TEXT: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Plain HTTP page fetcher. Does not execute JavaScript, so widget-driven schedules
/// only show up through their embed markup (which is what provider detection needs).
pub struct ReqwestPageFetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
}

enum AttemptError {
    /// Connection failures, 429 and 5xx: worth another attempt.
    Transient(String),
    Permanent(IngestError),
}

impl ReqwestPageFetcher {
    pub fn new(max_retries: u32, base_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).gzip(true).build()?;
        Ok(Self { client, max_retries, base_delay })
    }

    async fn fetch_once(&self, url: &str, options: &FetchOptions) -> std::result::Result<FetchedPage, AttemptError> {
        let timeout_ms = options.timeout.as_millis() as u64;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                AttemptError::Permanent(IngestError::FetchTimeout { url: url.to_string(), timeout_ms })
            } else if e.is_connect() {
                AttemptError::Transient(e.to_string())
            } else {
                AttemptError::Permanent(IngestError::Fetch { url: url.to_string(), message: e.to_string() })
            }
        };

        let resp = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AttemptError::Permanent(IngestError::Fetch {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            }));
        }

        let final_url = resp.url().to_string();
        let html = resp.text().await.map_err(classify)?;
        let text = html_to_text(&html);
        Ok(FetchedPage { url: final_url, html, text })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(url, options).await {
                Ok(page) => {
                    debug!(url, attempt, bytes = page.html.len(), "Fetched page");
                    return Ok(page);
                }
                Err(AttemptError::Transient(message)) if attempt <= self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(url, attempt, delay_ms = delay.as_millis() as u64, "Transient fetch error: {}", message);
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Transient(message)) => {
                    return Err(IngestError::Fetch {
                        url: url.to_string(),
                        message: format!("{message} (after {attempt} attempts)"),
                    });
                }
                Err(AttemptError::Permanent(e)) => return Err(e),
            }
        }
    }
}

/// Visible text of an HTML document with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |el| ELEMENTS_WITHOUT_TEXT.contains(&el.name()))
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}
