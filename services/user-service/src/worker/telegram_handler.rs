//! `telegram:send_message` 任务处理器

use async_trait::async_trait;
use tracing::{Instrument, error, info, info_span};
use userhub_ports::{TaskError, TaskHandler};
use userhub_telemetry::with_trace;

use crate::application::TelegramMessagePayload;
use crate::infrastructure::TelegramClient;

pub struct TelegramTaskHandler {
    client: TelegramClient,
}

impl TelegramTaskHandler {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for TelegramTaskHandler {
    async fn process(&self, task_type: &str, payload: &[u8]) -> Result<(), TaskError> {
        let payload: TelegramMessagePayload = serde_json::from_slice(payload).map_err(|e| {
            error!(task_type, error = %e, "Failed to decode telegram payload");
            TaskError::SkipRetry(format!("json decode failed: {}", e))
        })?;

        let trace = payload.trace().child();
        let span = info_span!("telegram_send_message", trace_id = %trace.trace_id);

        with_trace(trace, async {
            info!(chat_id = %payload.chat_id, "Sending telegram message");
            match self.client.send_message(&payload.chat_id, &payload.text).await {
                Ok(()) => {
                    info!("Telegram message sent successfully");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Failed to send telegram message");
                    Err(TaskError::Retry(format!(
                        "failed to send telegram message: {}",
                        e.message()
                    )))
                }
            }
        })
        .instrument(span)
        .await
    }
}
