//! PostgreSQL 事务管理模块
//!
//! [`TransactionManager::run_in_transaction`] 在一个事务里执行闭包：
//! - 传入的 scope 已经是活动事务时直接复用，不开启也不提交（平铺嵌套，无 savepoint）
//! - 闭包返回 `Err` 时回滚并返回原错误
//! - 闭包 panic 时回滚后原样继续 panic
//! - 闭包返回 `Ok` 时提交
//!
//! Future 在中途被丢弃时事务句柄随之释放，sqlx 会在连接归还前回滚。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};
use userhub_errors::{AppError, AppResult};
use userhub_ports::{ExecutionScope, SharedTx, TransactionBackend};

/// PostgreSQL 事务
pub type PgTx = Transaction<'static, Postgres>;

/// PostgreSQL 执行范围
pub type PgScope = ExecutionScope<PgTx>;

/// 基于连接池的事务后端
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionBackend for PostgresBackend {
    type Tx = PgTx;

    async fn begin(&self) -> AppResult<PgTx> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {}", e)))
    }

    async fn commit(&self, tx: PgTx) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(&self, tx: PgTx) -> AppResult<()> {
        tx.rollback()
            .await
            .map_err(|e| AppError::database(format!("Failed to rollback transaction: {}", e)))
    }
}

/// 事务管理器
pub struct TransactionManager<B: TransactionBackend = PostgresBackend> {
    backend: Arc<B>,
}

impl<B: TransactionBackend> Clone for TransactionManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: TransactionBackend> TransactionManager<B> {
    /// 创建新的事务管理器
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    #[cfg(test)]
    fn backend(&self) -> &B {
        &self.backend
    }

    /// 在事务中执行 `f`
    pub async fn run_in_transaction<T, F, Fut>(
        &self,
        scope: &ExecutionScope<B::Tx>,
        f: F,
    ) -> AppResult<T>
    where
        F: FnOnce(ExecutionScope<B::Tx>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if scope.is_active() {
            return f(scope.clone()).await;
        }

        let tx = self.backend.begin().await?;
        let handle: SharedTx<B::Tx> = Arc::new(Mutex::new(Some(tx)));
        debug!("Transaction started");

        let outcome = AssertUnwindSafe(f(ExecutionScope::Active(Arc::clone(&handle))))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                let tx = take_tx(&handle).await?;
                self.backend.commit(tx).await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Ok(Err(cause)) => {
                let tx = match take_tx(&handle).await {
                    Ok(tx) => tx,
                    Err(_) => return Err(cause),
                };
                if let Err(rollback_err) = self.backend.rollback(tx).await {
                    error!(
                        error = %rollback_err,
                        cause = %cause,
                        "Failed to rollback transaction"
                    );
                    return Err(AppError::internal(format!(
                        "failed to rollback transaction: {} (original error: {})",
                        rollback_err, cause
                    )));
                }
                debug!(cause = %cause, "Transaction rolled back");
                Err(cause)
            }
            Err(panic) => {
                if let Ok(tx) = take_tx(&handle).await {
                    if let Err(rollback_err) = self.backend.rollback(tx).await {
                        error!(error = %rollback_err, "Failed to rollback transaction after panic");
                    }
                }
                error!("Transaction aborted by panic");
                std::panic::resume_unwind(panic)
            }
        }
    }
}

impl TransactionManager<PostgresBackend> {
    /// 基于连接池创建
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(PostgresBackend::new(pool))
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        self.backend.pool()
    }
}

async fn take_tx<T>(handle: &SharedTx<T>) -> AppResult<T> {
    handle
        .lock()
        .await
        .take()
        .ok_or_else(|| AppError::internal("transaction already finished"))
}

/// 当前 scope 对应的执行器
pub enum PgExecutor {
    /// 从连接池取出的连接
    Pool(PoolConnection<Postgres>),
    /// 活动事务，持有期间同一事务的其它语句等待
    Tx(OwnedMutexGuard<Option<PgTx>>),
}

impl PgExecutor {
    pub fn as_conn(&mut self) -> AppResult<&mut PgConnection> {
        match self {
            PgExecutor::Pool(conn) => Ok(&mut **conn),
            PgExecutor::Tx(guard) => (**guard)
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or_else(|| AppError::internal("transaction already finished")),
        }
    }
}

/// 按 scope 选择执行器：活动事务用事务连接，否则从连接池获取
pub async fn get_executor(pool: &PgPool, scope: &PgScope) -> AppResult<PgExecutor> {
    match scope {
        ExecutionScope::Active(handle) => Ok(PgExecutor::Tx(Arc::clone(handle).lock_owned().await)),
        ExecutionScope::NoScope => pool
            .acquire()
            .await
            .map(PgExecutor::Pool)
            .map_err(|e| AppError::database(format!("Failed to acquire connection: {}", e))),
    }
}
