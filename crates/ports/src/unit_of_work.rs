//! Unit of Work 抽象
//!
//! 事务不放在隐式的上下文里，而是作为 [`ExecutionScope`] 显式传给每个 repository 调用。
//! 同一个 scope 内的所有语句共享一个事务句柄。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use userhub_errors::AppResult;

/// 事务后端：开启、提交、回滚
#[async_trait]
pub trait TransactionBackend: Send + Sync + 'static {
    /// 事务句柄
    type Tx: Send + 'static;

    async fn begin(&self) -> AppResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> AppResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> AppResult<()>;
}

/// 共享事务句柄
///
/// `Option` 在提交或回滚时被取走，之后再使用该句柄会得到错误而不是访问已结束的事务。
pub type SharedTx<T> = Arc<Mutex<Option<T>>>;

/// 执行范围
pub enum ExecutionScope<T> {
    /// 不在事务中，每条语句从连接池取连接
    NoScope,
    /// 活动事务
    Active(SharedTx<T>),
}

impl<T> ExecutionScope<T> {
    /// 包装一个新开启的事务
    pub fn active(tx: T) -> Self {
        Self::Active(Arc::new(Mutex::new(Some(tx))))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn transaction(&self) -> Option<&SharedTx<T>> {
        match self {
            Self::NoScope => None,
            Self::Active(tx) => Some(tx),
        }
    }
}

// 手写实现：派生会要求 T: Clone
impl<T> Clone for ExecutionScope<T> {
    fn clone(&self) -> Self {
        match self {
            Self::NoScope => Self::NoScope,
            Self::Active(tx) => Self::Active(Arc::clone(tx)),
        }
    }
}

impl<T> Default for ExecutionScope<T> {
    fn default() -> Self {
        Self::NoScope
    }
}

impl<T> std::fmt::Debug for ExecutionScope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoScope => write!(f, "NoScope"),
            Self::Active(_) => write!(f, "Active"),
        }
    }
}
