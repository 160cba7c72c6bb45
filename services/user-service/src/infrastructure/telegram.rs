//! Telegram Bot API 客户端

use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use tracing::debug;
use userhub_config::TelegramConfig;
use userhub_errors::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: Secret<String>,
}

impl TelegramClient {
    pub fn new(base_url: impl Into<String>, token: Secret<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &TelegramConfig) -> AppResult<Self> {
        Self::new(&config.base_url, config.token.clone())
    }

    /// POST `{base_url}/bot{token}/sendMessage`，表单参数 chat_id、text
    pub async fn send_message(&self, chat_id: &str, text: &str) -> AppResult<()> {
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.token.expose_secret()
        );

        let response = self
            .http
            .post(&endpoint)
            .form(&[("chat_id", chat_id), ("text", text)])
            .send()
            .await
            // reqwest 错误里带完整 URL，其中含 token
            .map_err(|e| {
                AppError::external_service(format!(
                    "failed to send telegram request: {}",
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external_service(format!(
                "telegram api returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        debug!(chat_id, "Telegram message delivered");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
