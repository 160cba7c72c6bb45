//! user-created 订阅处理器

use async_trait::async_trait;
use tracing::{Instrument, info, info_span};
use userhub_errors::{AppError, AppResult};
use userhub_ports::{Message, MessageHandler};
use userhub_telemetry::{TraceContext, with_trace};

/// 记录收到的用户创建事件
#[derive(Debug, Default, Clone)]
pub struct UserCreatedHandler;

impl UserCreatedHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for UserCreatedHandler {
    async fn handle(&self, message: &Message) -> AppResult<()> {
        let text = std::str::from_utf8(&message.data)
            .map_err(|e| AppError::validation(format!("message is not valid UTF-8: {}", e)))?;

        let trace = TraceContext::extract_or_new(&message.attributes).child();
        let span = info_span!(
            "user_created",
            trace_id = %trace.trace_id,
            message_id = %message.id,
            attempt = message.delivery_attempt
        );

        with_trace(trace, async {
            info!(data = text, "Received user created");
            Ok(())
        })
        .instrument(span)
        .await
    }
}
