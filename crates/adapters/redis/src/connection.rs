//! Redis 连接管理

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;
use userhub_common::{RetryConfig, with_retry};
use userhub_errors::{AppError, AppResult};

/// 创建 Redis 连接管理器
///
/// 连接断开后 `ConnectionManager` 会自动重连；这里只对首次建立连接做有限次重试。
pub async fn create_connection_manager(url: &str) -> AppResult<ConnectionManager> {
    let client = Client::open(url)
        .map_err(|e| AppError::internal(format!("Failed to create Redis client: {}", e)))?;

    let conn = with_retry(&RetryConfig::default(), "redis_connect", || {
        ConnectionManager::new(client.clone())
    })
    .await
    .map_err(|e| AppError::internal(format!("Failed to create Redis connection manager: {}", e)))?;

    info!("Redis connection manager created");
    Ok(conn)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &ConnectionManager) -> AppResult<()> {
    let mut conn = conn.clone();
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .map_err(|e| AppError::internal(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
