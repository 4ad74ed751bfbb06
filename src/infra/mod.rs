pub mod alert_webhook;
pub mod http_client;
pub mod llm_client;
