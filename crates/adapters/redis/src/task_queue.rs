//! 基于 Redis Stream 的任务队列（入队端）
//!
//! 每个命名队列对应一个 stream：`{prefix}:queue:{name}`，消息只有一个字段 `task`，
//! 内容为 [`TaskMessage`] 的 JSON。延迟重试的任务放在 `{prefix}:scheduled`（ZSET，
//! score 为到期时间毫秒），放弃的任务追加到 `{prefix}:archived`。

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;
use userhub_errors::{AppError, AppResult};
use userhub_ports::{Task, TaskInfo, TaskQueue};
use uuid::Uuid;

use crate::stream::StreamProducer;

/// stream 消息中承载任务的字段名
pub const TASK_FIELD: &str = "task";

/// 任务队列使用的 key
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn stream(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue)
    }

    /// 队列 stream 的公共前缀，调度脚本用它拼出目标 stream
    pub fn stream_prefix(&self) -> String {
        format!("{}:queue:", self.prefix)
    }

    pub fn scheduled(&self) -> String {
        format!("{}:scheduled", self.prefix)
    }

    pub fn archived(&self) -> String {
        format!("{}:archived", self.prefix)
    }

    /// worker 消费者组
    pub fn group(&self) -> String {
        format!("{}:workers", self.prefix)
    }
}

/// 队列中的任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// base64 编码的负载
    pub payload: String,
    pub queue: String,
    /// 已重试次数
    #[serde(default)]
    pub retry: u32,
    pub max_retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// 入队时间（毫秒）
    pub enqueued_at: i64,
}

impl TaskMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task.task_type.clone(),
            payload: STANDARD.encode(&task.payload),
            queue: task.queue.clone(),
            retry: 0,
            max_retry: task.max_retry,
            last_error: None,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn decode_payload(&self) -> AppResult<Vec<u8>> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| AppError::validation(format!("Invalid task payload: {}", e)))
    }

    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::internal(format!("Failed to serialize task: {}", e)))
    }

    /// 是否还能重试
    pub fn can_retry(&self) -> bool {
        self.retry < self.max_retry
    }
}

/// Redis 任务队列
#[derive(Clone)]
pub struct RedisTaskQueue {
    producer: StreamProducer,
    keys: QueueKeys,
}

impl RedisTaskQueue {
    pub fn new(producer: StreamProducer, keys: QueueKeys) -> Self {
        Self { producer, keys }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo> {
        if task.task_type.is_empty() {
            return Err(AppError::validation("task type must not be empty"));
        }

        let message = TaskMessage::from_task(&task);
        let json = message.to_json()?;
        let stream = self.keys.stream(&message.queue);
        self.producer.xadd(&stream, &[(TASK_FIELD, &json)]).await?;

        debug!(
            task_id = %message.id,
            task_type = %message.task_type,
            queue = %message.queue,
            "Task enqueued"
        );
        Ok(TaskInfo {
            id: message.id,
            queue: message.queue,
        })
    }
}
