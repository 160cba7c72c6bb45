//! Kafka Admin 模块
//!
//! 启动时确保 topic 存在

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, error, info};
use userhub_errors::{AppError, AppResult};

use crate::config::{DLQ_SUFFIX, KafkaConfig};

/// Topic 配置
#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i32,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
        }
    }

    /// 对应的 DLQ topic，单分区
    pub fn dead_letter(&self) -> Self {
        Self::new(
            format!("{}{}", self.name, DLQ_SUFFIX),
            1,
            self.replication_factor,
        )
    }
}

/// topic 及其订阅（消费者组）
#[derive(Debug, Clone)]
pub struct TopicSetup {
    pub topic: TopicConfig,
    pub subscription: String,
}

/// Kafka Admin 客户端
pub struct KafkaAdmin {
    admin: AdminClient<DefaultClientContext>,
    timeout: Duration,
}

impl KafkaAdmin {
    /// 创建 Admin 客户端
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        let mut client_config = ClientConfig::new();
        for (key, value) in config.to_client_config_entries() {
            client_config.set(&key, &value);
        }

        let admin: AdminClient<DefaultClientContext> = client_config
            .create()
            .map_err(|e| AppError::internal(format!("Failed to create admin client: {}", e)))?;

        Ok(Self {
            admin,
            timeout: Duration::from_secs(30),
        })
    }

    /// 创建 topic，已存在视为成功
    pub async fn ensure_topic(&self, topic_config: &TopicConfig) -> AppResult<()> {
        let new_topic = NewTopic::new(
            &topic_config.name,
            topic_config.num_partitions,
            TopicReplication::Fixed(topic_config.replication_factor),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .admin
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| AppError::internal(format!("Failed to create topic: {}", e)))?;

        for result in results {
            match result {
                Ok(name) => info!(topic = %name, "Topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %name, "Topic already exists");
                }
                Err((name, err)) => {
                    error!(topic = %name, error = ?err, "Failed to create topic");
                    return Err(AppError::internal(format!(
                        "Failed to create topic {}: {:?}",
                        name, err
                    )));
                }
            }
        }

        Ok(())
    }

    /// 确保每个 topic 及其 DLQ topic 存在
    ///
    /// 订阅即消费者组，首次加入时由 broker 创建，这里只记录日志。
    pub async fn ensure_setup(&self, setups: &[TopicSetup]) -> AppResult<()> {
        for setup in setups {
            self.ensure_topic(&setup.topic).await?;
            self.ensure_topic(&setup.topic.dead_letter()).await?;
            info!(
                topic = %setup.topic.name,
                subscription = %setup.subscription,
                "Topic and subscription ready"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_topic() {
        let topic = TopicConfig::new("user-created", 3, 1);
        let dlq = topic.dead_letter();
        assert_eq!(dlq.name, "user-created.dlq");
        assert_eq!(dlq.num_partitions, 1);
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_ensure_topic_is_idempotent() {
        let admin = KafkaAdmin::new(&KafkaConfig::new("localhost:9092")).unwrap();
        let topic = TopicConfig::new("userhub-admin-test", 1, 1);
        admin.ensure_topic(&topic).await.unwrap();
        admin.ensure_topic(&topic).await.unwrap();
    }
}
