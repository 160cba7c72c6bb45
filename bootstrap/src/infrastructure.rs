//! 基础设施资源管理
//!
//! 按配置创建连接池、Redis 连接与 Kafka 客户端，两个进程按需取用

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use tracing::info;
use userhub_adapter_kafka::{
    ConsumerConfig, KafkaAdmin, KafkaConfig as KafkaClientConfig, KafkaEventPublisher,
    ProducerConfig, TopicConfig, TopicSetup,
};
use userhub_adapter_postgres::{PostgresConfig, create_pool};
use userhub_adapter_redis::{
    QueueKeys, RedisCache, RedisTaskQueue, StreamProducer, TaskServerConfig,
    create_connection_manager,
};
use userhub_config::{AppConfig, KafkaConfig, WorkerConfig};
use userhub_errors::AppResult;

/// 创建 PostgreSQL 连接池（带重试）
pub async fn connect_postgres(config: &AppConfig) -> AppResult<PgPool> {
    let pg_config = PostgresConfig::new(config.database.url.expose_secret())
        .with_max_connections(config.database.max_connections)
        .with_min_connections(config.database.min_connections);
    let pool = create_pool(&pg_config).await?;
    info!(
        max_connections = config.database.max_connections,
        min_connections = config.database.min_connections,
        "PostgreSQL connection pool created"
    );
    Ok(pool)
}

/// 创建 Redis 连接（带重试）
pub async fn connect_redis(config: &AppConfig) -> AppResult<ConnectionManager> {
    let conn = create_connection_manager(config.redis.url.expose_secret()).await?;
    info!("Redis connection created");
    Ok(conn)
}

/// 启动时需要存在的 topic 与订阅
pub fn topic_setups(kafka: &KafkaConfig) -> Vec<TopicSetup> {
    vec![TopicSetup {
        topic: TopicConfig::new(
            &kafka.topic_user_created,
            kafka.num_partitions,
            kafka.replication_factor,
        ),
        subscription: kafka.subscription_user_created.clone(),
    }]
}

/// 确保 topic 存在，失败即退出
pub async fn ensure_topics(config: &AppConfig) -> AppResult<()> {
    let client = KafkaClientConfig::new(&config.kafka.brokers).with_client_id(&config.kafka.client_id);
    KafkaAdmin::new(&client)?
        .ensure_setup(&topic_setups(&config.kafka))
        .await
}

/// user-created 订阅的消费者配置
pub fn user_created_subscription(config: &AppConfig) -> ConsumerConfig {
    ConsumerConfig::new(
        &config.kafka.brokers,
        &config.kafka.subscription_user_created,
        &config.kafka.topic_user_created,
    )
    .with_client_id(format!("{}-subscriber", config.kafka.client_id))
    .with_max_deliveries(config.kafka.max_deliveries)
}

/// 任务队列使用的 key
pub fn queue_keys(config: &AppConfig) -> QueueKeys {
    QueueKeys::new(&config.redis.key_prefix)
}

/// worker 配置转换为任务服务器配置
pub fn task_server_config(worker: &WorkerConfig) -> TaskServerConfig {
    TaskServerConfig {
        // 消费者名在组内唯一，多个 worker 进程可以同时运行
        consumer_name: format!("{}-{}", worker.name, std::process::id()),
        concurrency: worker.concurrency.max(1),
        queues: worker.queues.clone(),
        shutdown_grace: worker.shutdown_grace(),
        ..TaskServerConfig::default()
    }
}

/// API 进程使用的基础设施
pub struct Infrastructure {
    config: AppConfig,
    postgres_pool: PgPool,
    redis_conn: ConnectionManager,
    event_publisher: Arc<KafkaEventPublisher>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let postgres_pool = connect_postgres(&config).await?;
        let redis_conn = connect_redis(&config).await?;

        ensure_topics(&config).await?;
        let producer_config = ProducerConfig::new(&config.kafka.brokers)
            .with_client_id(&config.kafka.client_id)
            .with_request_timeout(config.kafka.publish_timeout());
        let event_publisher = Arc::new(KafkaEventPublisher::new(&producer_config)?);
        info!("Kafka producer created");

        Ok(Self {
            config,
            postgres_pool,
            redis_conn,
            event_publisher,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn postgres_pool(&self) -> PgPool {
        self.postgres_pool.clone()
    }

    pub fn redis_connection_manager(&self) -> ConnectionManager {
        self.redis_conn.clone()
    }

    /// Redis 缓存（实现 CachePort）
    pub fn redis_cache(&self) -> RedisCache {
        RedisCache::new(self.redis_conn.clone())
    }

    /// Redis 任务队列（实现 TaskQueue）
    pub fn task_queue(&self) -> RedisTaskQueue {
        RedisTaskQueue::new(
            StreamProducer::new(self.redis_conn.clone()),
            queue_keys(&self.config),
        )
    }

    pub fn event_publisher(&self) -> Arc<KafkaEventPublisher> {
        self.event_publisher.clone()
    }

    /// 关闭前刷新未发送的消息
    pub fn flush(&self) {
        if let Err(e) = self.event_publisher.flush(Duration::from_secs(5)) {
            tracing::warn!(error = %e, "Failed to flush Kafka producer");
        }
    }
}
