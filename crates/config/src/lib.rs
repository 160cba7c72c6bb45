//! userhub-config - 配置加载库
//!
//! 加载顺序（后者覆盖前者）：
//! 1. `{config_dir}/default.toml`
//! 2. `{config_dir}/{APP_ENV}.toml`
//! 3. 环境变量 `APP__SECTION__KEY`（如 `APP__DATABASE__URL`）
//!
//! 启动前会尝试读取 `.env`，不存在时忽略。

use std::collections::BTreeMap;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 优雅关闭时等待进行中请求的时间
    #[serde(default = "default_server_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_server_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_server_grace_secs(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    5
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "userhub".to_string()
}

/// Kafka 配置（事件总线）
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_user_created")]
    pub topic_user_created: String,
    /// 订阅 user-created 的消费者组
    #[serde(default = "default_user_created")]
    pub subscription_user_created: String,
    #[serde(default = "default_num_partitions")]
    pub num_partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    /// 超过该投递次数后进入死信 topic
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

fn default_client_id() -> String {
    "userhub".to_string()
}

fn default_user_created() -> String {
    "user-created".to_string()
}

fn default_num_partitions() -> i32 {
    3
}

fn default_replication_factor() -> i32 {
    1
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_publish_timeout_secs() -> u64 {
    5
}

impl KafkaConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Telegram 通知配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
    #[serde(default = "empty_secret")]
    pub token: Secret<String>,
    #[serde(default)]
    pub chat_id: String,
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            base_url: default_telegram_base_url(),
            token: empty_secret(),
            chat_id: String::new(),
        }
    }
}

/// 任务队列 worker 配置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_name")]
    pub name: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 队列名 -> 优先级权重
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, u32>,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_worker_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_worker_name() -> String {
    "userhub-worker".to_string()
}

fn default_concurrency() -> usize {
    10
}

fn default_queues() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("critical".to_string(), 6),
        ("default".to_string(), 3),
        ("low".to_string(), 1),
    ])
}

fn default_max_retry() -> u32 {
    25
}

fn default_worker_grace_secs() -> u64 {
    8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            concurrency: default_concurrency(),
            queues: default_queues(),
            max_retry: default_max_retry(),
            shutdown_grace_secs: default_worker_grace_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// 响应缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_name() -> String {
    "userhub".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());
        Self::figment(config_dir, &env).extract().map_err(Into::into)
    }

    /// 构造配置源
    pub fn figment(config_dir: &str, env: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("APP__").split("__"))
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

#[cfg(test)]
mod tests;
