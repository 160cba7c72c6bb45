//! PostgreSQL 连接管理

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use userhub_common::{RetryConfig, with_retry};
use userhub_errors::{AppError, AppResult};

use crate::error::is_sqlx_retryable;

/// PostgreSQL 连接池配置
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// 启动时建立连接的重试策略
    pub retry: RetryConfig,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 25,
            min_connections: 5,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            retry: RetryConfig::new(5, Duration::from_millis(500), Duration::from_secs(10)),
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }
}

/// 创建 PostgreSQL 连接池
///
/// 只对连接类的瞬时错误重试，认证失败等错误立即返回。
pub async fn create_pool(config: &PostgresConfig) -> AppResult<PgPool> {
    let options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout);

    let pool = with_retry(&config.retry, "postgres_connect", || {
        let options = options.clone();
        async move {
            match options.connect(&config.url).await {
                Ok(pool) => Ok(Ok(pool)),
                Err(e) if is_sqlx_retryable(&e) => Err(e),
                Err(e) => Ok(Err(e)),
            }
        }
    })
    .await
    .and_then(|inner| inner)
    .map_err(|e| AppError::database(format!("Failed to create pool: {}", e)))?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "PostgreSQL pool created"
    );
    Ok(pool)
}

/// 检查数据库连接
pub async fn check_connection(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::database(format!("Database health check failed: {}", e)))?;
    Ok(())
}
