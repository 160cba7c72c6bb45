//! Kafka 订阅者
//!
//! 一个消费者组订阅一个 topic，逐条交给 [`MessageHandler`]：
//! - 处理成功：提交 offset（ack）
//! - 处理失败或 panic：不提交，回退到该 offset 并退避后重新投递（nack）
//! - 投递次数达到上限：写入 DLQ 后提交
//! - 提交或回退失败只记录，不结束消费循环
//!
//! 收到取消信号后停止拉取并返回。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as _, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use userhub_errors::{AppError, AppResult};
use userhub_ports::{Message, MessageHandler};
use userhub_telemetry::record_message;

use crate::config::ConsumerConfig;

/// DLQ 消息元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMetadata {
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    /// 最后一次失败原因
    pub error_message: String,
    pub delivery_attempts: u32,
    /// 失败时间戳
    pub failed_at: i64,
}

/// DLQ 消息包装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub metadata: DlqMetadata,
    /// 原始消息内容
    pub payload: String,
    pub attributes: HashMap<String, String>,
}

/// 单条消息的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    Nack(String),
    DeadLetter(String),
}

/// 根据处理结果和已投递次数决定 ack / nack / DLQ
pub fn decide(failure: Option<String>, attempt: u32, max_deliveries: u32) -> Verdict {
    match failure {
        None => Verdict::Ack,
        Some(reason) if attempt < max_deliveries => Verdict::Nack(reason),
        Some(reason) => Verdict::DeadLetter(reason),
    }
}

/// 结论落地时对 offset 的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAction {
    /// 提交下一个 offset
    Commit,
    /// 回退到当前 offset，稍后重新投递
    Rewind,
}

impl OffsetAction {
    fn failure_outcome(self) -> &'static str {
        match self {
            OffsetAction::Commit => "commit_error",
            OffsetAction::Rewind => "seek_error",
        }
    }
}

/// DLQ 写入失败时不提交，消息会重新投递
pub fn offset_action(verdict: &Verdict, dlq_sent: bool) -> OffsetAction {
    match verdict {
        Verdict::Ack => OffsetAction::Commit,
        Verdict::Nack(_) => OffsetAction::Rewind,
        Verdict::DeadLetter(_) if dlq_sent => OffsetAction::Commit,
        Verdict::DeadLetter(_) => OffsetAction::Rewind,
    }
}

/// 执行 offset 操作，失败只记录日志和指标，不中断消费循环
///
/// 未提交的 offset 会在 rebalance 或重启后重新投递。
pub fn settle_offset<F>(message: &Message, action: OffsetAction, op: F) -> bool
where
    F: FnOnce(OffsetAction) -> AppResult<()>,
{
    match op(action) {
        Ok(()) => true,
        Err(e) => {
            record_message(&message.topic, action.failure_outcome());
            error!(
                message_id = %message.id,
                action = ?action,
                error = %e,
                "Failed to settle message offset"
            );
            false
        }
    }
}

/// 调用处理器，返回失败原因；panic 视为失败
pub async fn invoke_handler(handler: &dyn MessageHandler, message: &Message) -> Option<String> {
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn to_message(owned: &OwnedMessage, attempt: u32) -> Message {
    let attributes = owned
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|h| {
                    let value = h.value?;
                    Some((h.key.to_string(), String::from_utf8_lossy(value).to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Message {
        id: format!("{}/{}/{}", owned.topic(), owned.partition(), owned.offset()),
        topic: owned.topic().to_string(),
        data: owned.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        attributes,
        delivery_attempt: attempt,
    }
}

/// Kafka 订阅者
pub struct KafkaSubscriber {
    consumer: StreamConsumer,
    dlq_producer: Option<FutureProducer>,
    config: ConsumerConfig,
}

impl KafkaSubscriber {
    /// 创建消费者并订阅 topic
    pub fn new(config: ConsumerConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();
        for (key, value) in config.to_client_config_entries() {
            client_config.set(&key, &value);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| AppError::internal(format!("Failed to subscribe to topic: {}", e)))?;

        let dlq_producer = if config.enable_dlq {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &config.base.brokers)
                .set("client.id", format!("{}-dlq-producer", config.group_id))
                .create()
                .map_err(|e| AppError::internal(format!("Failed to create DLQ producer: {}", e)))?;
            Some(producer)
        } else {
            None
        };

        info!(
            group_id = %config.group_id,
            topic = %config.topic,
            max_deliveries = config.max_deliveries,
            "Kafka subscriber created"
        );

        Ok(Self {
            consumer,
            dlq_producer,
            config,
        })
    }

    /// 持续消费直到 `shutdown` 被取消
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> AppResult<()> {
        let mut stream = self.consumer.stream();
        // (partition, offset) -> 已投递次数
        let mut attempts: HashMap<(i32, i64), u32> = HashMap::new();

        info!(topic = %self.config.topic, group_id = %self.config.group_id, "Subscriber started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            let owned = match next {
                Some(Ok(message)) => message.detach(),
                Some(Err(e)) => {
                    error!(topic = %self.config.topic, error = %e, "Error receiving message");
                    continue;
                }
                None => break,
            };

            let key = (owned.partition(), owned.offset());
            let attempt = {
                let count = attempts.entry(key).or_insert(0);
                *count += 1;
                *count
            };

            let message = to_message(&owned, attempt);
            debug!(message_id = %message.id, attempt, "Message received");

            let failure = invoke_handler(handler.as_ref(), &message).await;

            let verdict = decide(failure, attempt, self.config.max_deliveries);
            let dlq_sent = match &verdict {
                Verdict::Ack => {
                    attempts.remove(&key);
                    record_message(&message.topic, "ack");
                    false
                }
                Verdict::Nack(reason) => {
                    record_message(&message.topic, "nack");
                    warn!(
                        message_id = %message.id,
                        attempt,
                        error = %reason,
                        "Message processing failed, will redeliver"
                    );
                    false
                }
                Verdict::DeadLetter(reason) => {
                    record_message(&message.topic, "dead_letter");
                    match self.send_to_dlq(&message, &owned, reason).await {
                        Ok(()) => {
                            attempts.remove(&key);
                            true
                        }
                        Err(e) => {
                            error!(message_id = %message.id, error = %e, "Failed to send to DLQ");
                            false
                        }
                    }
                }
            };

            settle_offset(&message, offset_action(&verdict, dlq_sent), |action| match action {
                OffsetAction::Commit => self.commit(&owned),
                OffsetAction::Rewind => self.rewind(&owned),
            });

            if matches!(verdict, Verdict::Nack(_)) {
                let delay = self
                    .config
                    .nack_backoff
                    .jittered_delay_for_attempt(attempt.saturating_sub(1));
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(topic = %self.config.topic, "Subscriber stopped");
        Ok(())
    }

    /// 提交下一个 offset
    fn commit(&self, owned: &OwnedMessage) -> AppResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(owned.topic(), owned.partition(), Offset::Offset(owned.offset() + 1))
            .map_err(|e| AppError::internal(format!("Failed to build offset list: {}", e)))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| AppError::internal(format!("Failed to commit offset: {}", e)))
    }

    /// 回退到该消息，下一次拉取重新投递
    fn rewind(&self, owned: &OwnedMessage) -> AppResult<()> {
        self.consumer
            .seek(
                owned.topic(),
                owned.partition(),
                Offset::Offset(owned.offset()),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| AppError::internal(format!("Failed to seek: {}", e)))
    }

    async fn send_to_dlq(&self, message: &Message, owned: &OwnedMessage, reason: &str) -> AppResult<()> {
        let Some(dlq_producer) = &self.dlq_producer else {
            warn!(message_id = %message.id, "DLQ is disabled, message will be dropped");
            return Ok(());
        };

        let dlq_topic = self.config.dlq_topic();
        let dlq_message = DlqMessage {
            metadata: DlqMetadata {
                original_topic: message.topic.clone(),
                original_partition: owned.partition(),
                original_offset: owned.offset(),
                error_message: reason.to_string(),
                delivery_attempts: message.delivery_attempt,
                failed_at: chrono::Utc::now().timestamp(),
            },
            payload: String::from_utf8_lossy(&message.data).to_string(),
            attributes: message.attributes.clone(),
        };

        let dlq_payload = serde_json::to_string(&dlq_message)
            .map_err(|e| AppError::internal(format!("Failed to serialize DLQ message: {}", e)))?;

        let record: FutureRecord<'_, str, String> = FutureRecord::to(&dlq_topic)
            .payload(&dlq_payload)
            .key(message.topic.as_str());

        dlq_producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(e, _)| AppError::internal(format!("Failed to send to DLQ: {}", e)))?;

        warn!(
            dlq_topic = %dlq_topic,
            message_id = %message.id,
            attempts = message.delivery_attempt,
            error = %reason,
            "Message sent to DLQ"
        );
        Ok(())
    }
}
