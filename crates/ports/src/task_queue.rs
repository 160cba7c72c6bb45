//! 任务队列 trait 定义

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use userhub_errors::AppResult;

/// 默认队列
pub const DEFAULT_QUEUE: &str = "default";

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// 待入队任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// 类型标签，worker 按它分发到处理器
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub max_retry: u32,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            queue: DEFAULT_QUEUE.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }
}

/// 入队结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub queue: String,
}

/// 任务入队 trait
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo>;
}

/// 任务处理失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// 按退避策略重试
    #[error("retry: {0}")]
    Retry(String),
    /// 不再重试，直接归档
    #[error("skip retry: {0}")]
    SkipRetry(String),
}

/// 任务处理器 trait
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task_type: &str, payload: &[u8]) -> Result<(), TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("telegram:send_message", b"{}".to_vec());
        assert_eq!(task.queue, "default");
        assert_eq!(task.max_retry, 25);

        let task = task.with_queue("critical").with_max_retry(3);
        assert_eq!(task.queue, "critical");
        assert_eq!(task.max_retry, 3);
    }

    #[test]
    fn test_task_error_display() {
        assert_eq!(TaskError::Retry("boom".into()).to_string(), "retry: boom");
        assert_eq!(
            TaskError::SkipRetry("bad payload".into()).to_string(),
            "skip retry: bad payload"
        );
    }
}
