//! adapter-kafka - Kafka 适配器
//!
//! - Topic 管理（启动时确保存在）
//! - 事件发布（按 topic 缓存发布句柄，消息头携带 trace 上下文）
//! - 事件订阅（手动提交、nack 重投、超限进入 DLQ）

mod admin;
mod config;
mod producer;
mod subscriber;

pub use admin::*;
pub use config::*;
pub use producer::*;
pub use subscriber::*;
