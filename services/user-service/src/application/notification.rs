//! 写操作之后的异步通知内容

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use userhub_errors::{AppError, AppResult};
use userhub_ports::Task;
use userhub_telemetry::TraceContext;

use crate::domain::User;

/// Telegram 消息任务类型
pub const TYPE_TELEGRAM_MESSAGE: &str = "telegram:send_message";

/// 响应缓存 key 前缀
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// 按请求路径生成缓存 key
pub fn cache_key(path: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, path)
}

/// `GET /api/v1/users/{id}` 的缓存 key
pub fn user_cache_key(id: i64) -> String {
    cache_key(&format!("/api/v1/users/{}", id))
}

pub fn user_created_message(user: &User) -> String {
    format!("New user created: {} ({})", user.name, user.email)
}

pub fn user_updated_message(user: &User) -> String {
    format!("User updated: {} ({})", user.name, user.email)
}

/// `telegram:send_message` 任务载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramMessagePayload {
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub trace_context: HashMap<String, String>,
}

impl TelegramMessagePayload {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>, trace: &TraceContext) -> Self {
        let mut trace_context = HashMap::new();
        trace.inject(&mut trace_context);
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            trace_context,
        }
    }

    pub fn into_task(self) -> AppResult<Task> {
        let payload = serde_json::to_vec(&self)
            .map_err(|e| AppError::internal(format!("Failed to encode task payload: {}", e)))?;
        Ok(Task::new(TYPE_TELEGRAM_MESSAGE, payload))
    }

    /// 载荷中携带的 trace 上下文，缺失时新建根上下文
    pub fn trace(&self) -> TraceContext {
        TraceContext::extract_or_new(&self.trace_context)
    }
}
