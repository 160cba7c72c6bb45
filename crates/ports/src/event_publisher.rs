//! 事件发布/订阅 trait 定义

use std::collections::HashMap;

use async_trait::async_trait;
use userhub_errors::AppResult;

/// 事件发布者 trait
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布一条消息，返回消息总线分配的投递 ID
    ///
    /// 只等待总线确认，不等待任何消费者。
    async fn publish(
        &self,
        topic: &str,
        data: &[u8],
        attributes: HashMap<String, String>,
    ) -> AppResult<String>;
}

/// 订阅收到的消息
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    /// 第几次投递，从 1 开始
    pub delivery_attempt: u32,
}

/// 订阅消息处理器
///
/// 返回 `Ok` 确认消息；返回 `Err` 表示需要重新投递。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> AppResult<()>;
}
