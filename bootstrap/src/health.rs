//! 健康检查模块
//!
//! 依次探测依赖，第一个失败的依赖决定结果

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use userhub_errors::AppResult;

/// 单个依赖的探针
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// 报告中的字段名
    fn name(&self) -> &'static str;

    /// 出错提示中的名称
    fn display_name(&self) -> &'static str;

    async fn check(&self) -> AppResult<()>;
}

/// PostgreSQL 探针
pub struct PostgresProbe(pub PgPool);

#[async_trait]
impl HealthProbe for PostgresProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    fn display_name(&self) -> &'static str {
        "Database"
    }

    async fn check(&self) -> AppResult<()> {
        userhub_adapter_postgres::check_connection(&self.0).await
    }
}

/// Redis 探针
pub struct RedisProbe(pub ConnectionManager);

#[async_trait]
impl HealthProbe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn display_name(&self) -> &'static str {
        "Redis"
    }

    async fn check(&self) -> AppResult<()> {
        userhub_adapter_redis::check_connection(&self.0).await
    }
}

/// 全部依赖可用时的报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    #[serde(flatten)]
    pub components: BTreeMap<&'static str, &'static str>,
}

/// 第一个不可用的依赖
#[derive(Debug, Clone)]
pub struct ComponentFailure {
    pub component: &'static str,
    pub message: String,
    pub cause: String,
}

/// 健康检查器
#[derive(Clone, Default)]
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// 数据库 + Redis
    pub fn for_infrastructure(pool: PgPool, redis: ConnectionManager) -> Self {
        Self::new()
            .with_probe(Arc::new(PostgresProbe(pool)))
            .with_probe(Arc::new(RedisProbe(redis)))
    }

    pub async fn check(&self) -> Result<HealthStatus, ComponentFailure> {
        let mut components = BTreeMap::new();

        for probe in &self.probes {
            if let Err(e) = probe.check().await {
                warn!(component = probe.name(), error = %e, "Health check failed");
                return Err(ComponentFailure {
                    component: probe.name(),
                    message: format!("{} connection failed", probe.display_name()),
                    cause: e.to_string(),
                });
            }
            components.insert(probe.name(), "connected");
        }

        Ok(HealthStatus {
            status: "ok",
            components,
        })
    }
}
