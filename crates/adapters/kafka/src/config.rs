//! Kafka 配置

use std::collections::HashMap;
use std::time::Duration;

use userhub_common::RetryConfig;

/// Kafka 基础配置
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker 地址列表
    pub brokers: String,
    /// 客户端 ID
    pub client_id: Option<String>,
    /// 额外配置
    pub extra: HashMap<String, String>,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            client_id: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// 转换为 rdkafka ClientConfig 的配置项
    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![("bootstrap.servers".to_string(), self.brokers.clone())];

        if let Some(client_id) = &self.client_id {
            entries.push(("client.id".to_string(), client_id.clone()));
        }

        for (key, value) in &self.extra {
            entries.push((key.clone(), value.clone()));
        }

        entries
    }
}

/// Producer 配置
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub base: KafkaConfig,
    /// 确认模式：0=不等待，1=leader确认，-1=所有副本确认
    pub acks: i32,
    /// 等待投递确认的超时
    pub request_timeout: Duration,
    pub enable_idempotence: bool,
}

impl ProducerConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            base: KafkaConfig::new(brokers),
            acks: -1,
            request_timeout: Duration::from_secs(5),
            enable_idempotence: true,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.base = self.base.with_client_id(client_id);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 转换为 rdkafka ClientConfig 的配置项
    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = self.base.to_client_config_entries();
        entries.push(("acks".to_string(), self.acks.to_string()));
        entries.push((
            "message.timeout.ms".to_string(),
            self.request_timeout.as_millis().to_string(),
        ));
        entries.push((
            "enable.idempotence".to_string(),
            self.enable_idempotence.to_string(),
        ));
        entries
    }
}

/// 订阅配置：一个消费者组订阅一个 topic
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub base: KafkaConfig,
    /// 消费者组 ID（即订阅名）
    pub group_id: String,
    pub topic: String,
    pub session_timeout: Duration,
    /// 最多投递次数，超过后进入 DLQ
    pub max_deliveries: u32,
    /// nack 后重新投递前的退避
    pub nack_backoff: RetryConfig,
    pub enable_dlq: bool,
    /// DLQ topic 后缀
    pub dlq_suffix: String,
}

impl ConsumerConfig {
    pub fn new(
        brokers: impl Into<String>,
        group_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            base: KafkaConfig::new(brokers),
            group_id: group_id.into(),
            topic: topic.into(),
            session_timeout: Duration::from_secs(45),
            max_deliveries: 5,
            nack_backoff: RetryConfig::new(u32::MAX, Duration::from_millis(500), Duration::from_secs(30)),
            enable_dlq: true,
            dlq_suffix: DLQ_SUFFIX.to_string(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.base = self.base.with_client_id(client_id);
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_nack_backoff(mut self, backoff: RetryConfig) -> Self {
        self.nack_backoff = backoff;
        self
    }

    pub fn with_dlq(mut self, enable: bool) -> Self {
        self.enable_dlq = enable;
        self
    }

    pub fn dlq_topic(&self) -> String {
        format!("{}{}", self.topic, self.dlq_suffix)
    }

    /// 转换为 rdkafka ClientConfig 的配置项
    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = self.base.to_client_config_entries();
        entries.push(("group.id".to_string(), self.group_id.clone()));
        // 只在处理成功或进入 DLQ 后手动提交
        entries.push(("enable.auto.commit".to_string(), "false".to_string()));
        entries.push(("auto.offset.reset".to_string(), "earliest".to_string()));
        entries.push((
            "session.timeout.ms".to_string(),
            self.session_timeout.as_millis().to_string(),
        ));
        entries
    }
}

/// DLQ topic 默认后缀
pub const DLQ_SUFFIX: &str = ".dlq";
