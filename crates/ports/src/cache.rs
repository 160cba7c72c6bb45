//! Cache trait 定义

use async_trait::async_trait;
use std::time::Duration;
use userhub_errors::AppResult;

/// 缓存 trait
#[async_trait]
pub trait CachePort: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 设置缓存值，`ttl` 为 None 时不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// 删除缓存，key 不存在时不报错
    async fn delete(&self, key: &str) -> AppResult<()>;
}
