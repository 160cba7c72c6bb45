//! Kafka Producer
//!
//! 提供消息发布功能。每个 topic 首次发布时创建一个发布句柄并缓存，
//! 并发的首次发布只会插入一次。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, error};
use userhub_errors::{AppError, AppResult};
use userhub_ports::EventPublisher;
use userhub_telemetry::{TRACEPARENT_HEADER, TraceContext};

use crate::config::ProducerConfig;

/// 单个 topic 的发布句柄
pub struct TopicPublisher {
    topic: String,
    producer: FutureProducer,
    timeout: Duration,
}

impl TopicPublisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 发送并等待 broker 确认，返回 `topic/partition/offset`
    pub async fn send(&self, data: &[u8], attributes: &HashMap<String, String>) -> AppResult<String> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic)
            .payload(data)
            .headers(to_headers(attributes));

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| {
                error!(topic = %self.topic, error = %e, "Failed to publish message");
                AppError::external_service(format!("Failed to publish message: {}", e))
            })?;

        debug!(
            topic = %self.topic,
            partition = partition,
            offset = offset,
            "Message published"
        );

        Ok(format!("{}/{}/{}", self.topic, partition, offset))
    }
}

fn to_headers(attributes: &HashMap<String, String>) -> OwnedHeaders {
    attributes
        .iter()
        .fold(OwnedHeaders::new_with_capacity(attributes.len()), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

/// Kafka Event Publisher
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    timeout: Duration,
    topics: DashMap<String, Arc<TopicPublisher>>,
}

impl KafkaEventPublisher {
    /// 从完整配置创建
    pub fn new(config: &ProducerConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();

        for (key, value) in config.to_client_config_entries() {
            client_config.set(&key, &value);
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create Kafka producer: {}", e)))?;

        Ok(Self {
            producer,
            timeout: config.request_timeout,
            topics: DashMap::new(),
        })
    }

    /// 获取 topic 的发布句柄，不存在时创建
    pub fn topic(&self, name: &str) -> Arc<TopicPublisher> {
        if let Some(handle) = self.topics.get(name) {
            return handle.clone();
        }

        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(topic = %name, "Topic publisher created");
                Arc::new(TopicPublisher {
                    topic: name.to_string(),
                    producer: self.producer.clone(),
                    timeout: self.timeout,
                })
            })
            .clone()
    }

    /// 已缓存的句柄数
    pub fn cached_topics(&self) -> usize {
        self.topics.len()
    }

    /// 刷新未发送的消息，关闭前调用
    pub fn flush(&self, timeout: Duration) -> AppResult<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| AppError::internal(format!("Failed to flush producer: {}", e)))
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        data: &[u8],
        mut attributes: HashMap<String, String>,
    ) -> AppResult<String> {
        if !attributes.contains_key(TRACEPARENT_HEADER) {
            TraceContext::new_root().inject(&mut attributes);
        }

        self.topic(topic).send(data, &attributes).await
    }
}
