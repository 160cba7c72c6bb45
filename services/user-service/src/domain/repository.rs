//! 用户 Repository trait
//!
//! 每个操作都带执行 scope：`NoScope` 时在连接池上执行，
//! `Active` 时在 scope 持有的事务中执行。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use userhub_common::{FilterParams, PaginationParams, SortParams};
use userhub_errors::AppResult;
use userhub_ports::ExecutionScope;

use super::user::{NewUser, User};

/// 可作为过滤条件的字段 -> 列
pub const FILTER_COLUMNS: &[(&str, &str)] = &[("name", "name"), ("email", "email")];

/// 可排序字段 -> 列
pub const SORT_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("email", "email"),
    ("name", "name"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
];

#[async_trait]
pub trait UserRepository<Tx: Send + 'static>: Send + Sync {
    /// 插入用户，返回带存储分配字段的实体；邮箱重复为 Conflict
    async fn create(&self, scope: &ExecutionScope<Tx>, user: NewUser) -> AppResult<User>;

    /// 不存在时返回 NotFound
    async fn get_by_id(&self, scope: &ExecutionScope<Tx>, id: i64) -> AppResult<User>;

    /// 不存在时返回 NotFound
    async fn get_by_email(&self, scope: &ExecutionScope<Tx>, email: &str) -> AppResult<User>;

    /// 分页列表，过滤为 ILIKE 包含匹配
    async fn list(
        &self,
        scope: &ExecutionScope<Tx>,
        pagination: &PaginationParams,
        filters: &FilterParams,
        sorts: &[SortParams],
    ) -> AppResult<Vec<User>>;

    /// 更新 email、name，返回新的 updated_at
    async fn update(&self, scope: &ExecutionScope<Tx>, user: &User) -> AppResult<DateTime<Utc>>;

    /// 没有删除任何行时返回 NotFound
    async fn delete(&self, scope: &ExecutionScope<Tx>, id: i64) -> AppResult<()>;

    /// 与 `list` 相同的过滤条件下的总数
    async fn count(&self, scope: &ExecutionScope<Tx>, filters: &FilterParams) -> AppResult<i64>;
}
