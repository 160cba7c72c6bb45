//! 用户用例
//!
//! 写操作在事务内完成；提交之后才触发副作用：
//! - 事件发布和任务入队放到独立的 tokio 任务中执行，失败只记录日志和指标
//! - 缓存失效在返回响应前完成，失败同样只记录日志
//!
//! 读操作不开事务，直接在连接池上执行。
//!
//! 分离出去的分发登记在 `TaskTracker` 中，退出前由 `drain_dispatches` 在宽限期内等待完成。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};
use userhub_adapter_postgres::{PostgresBackend, TransactionManager};
use userhub_common::{FilterParams, PaginationParams, SortParams};
use userhub_errors::{AppError, AppResult};
use userhub_ports::{
    CachePort, EventPublisher, ExecutionScope, TaskQueue, TransactionBackend,
};
use userhub_telemetry::{TraceContext, current_trace, record_dispatch};

use super::dto::{CreateUserRequest, UpdateUserRequest, UserPage, UserResponse};
use super::notification::{
    TelegramMessagePayload, user_cache_key, user_created_message, user_updated_message,
};
use crate::domain::{EMAIL_EXISTS, NewUser, UserRepository, hash_password};

/// 用户用例
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserUsecase: Send + Sync {
    async fn create_user(&self, request: CreateUserRequest) -> AppResult<UserResponse>;

    async fn get_user(&self, id: i64) -> AppResult<UserResponse>;

    async fn list_users(
        &self,
        pagination: PaginationParams,
        filters: FilterParams,
        sorts: Vec<SortParams>,
    ) -> AppResult<UserPage>;

    async fn update_user(&self, id: i64, request: UpdateUserRequest) -> AppResult<UserResponse>;

    async fn delete_user(&self, id: i64) -> AppResult<()>;
}

/// 通知目标
#[derive(Debug, Clone, Default)]
pub struct NotificationSettings {
    pub topic_user_created: String,
    pub telegram_chat_id: String,
}

pub struct UserService<B: TransactionBackend = PostgresBackend> {
    repo: Arc<dyn UserRepository<B::Tx>>,
    transactions: TransactionManager<B>,
    publisher: Arc<dyn EventPublisher>,
    tasks: Arc<dyn TaskQueue>,
    cache: Arc<dyn CachePort>,
    settings: NotificationSettings,
    dispatches: TaskTracker,
}

impl<B: TransactionBackend> UserService<B> {
    pub fn new(
        repo: Arc<dyn UserRepository<B::Tx>>,
        transactions: TransactionManager<B>,
        publisher: Arc<dyn EventPublisher>,
        tasks: Arc<dyn TaskQueue>,
        cache: Arc<dyn CachePort>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            repo,
            transactions,
            publisher,
            tasks,
            cache,
            settings,
            dispatches: TaskTracker::new(),
        }
    }

    /// 等待已分发的异步任务完成
    ///
    /// 宽限期内全部完成返回 true；超时时记录被放弃的数量并返回 false。
    pub async fn drain_dispatches(&self, grace: Duration) -> bool {
        self.dispatches.close();
        if tokio::time::timeout(grace, self.dispatches.wait())
            .await
            .is_ok()
        {
            debug!("Async dispatches drained");
            return true;
        }

        warn!(
            pending = self.dispatches.len(),
            grace_ms = grace.as_millis() as u64,
            "Dropping unfinished async dispatches"
        );
        false
    }

    fn publish_detached(&self, message: String, trace: &TraceContext) {
        let publisher = Arc::clone(&self.publisher);
        let topic = self.settings.topic_user_created.clone();
        let mut attributes = HashMap::new();
        trace.child().inject(&mut attributes);

        spawn_dispatch(&self.dispatches, "publish", async move {
            publisher
                .publish(&topic, message.as_bytes(), attributes)
                .await
        });
    }

    fn enqueue_telegram_detached(&self, text: String, trace: &TraceContext) {
        let tasks = Arc::clone(&self.tasks);
        let payload =
            TelegramMessagePayload::new(self.settings.telegram_chat_id.clone(), text, &trace.child());

        spawn_dispatch(&self.dispatches, "enqueue", async move {
            let info = tasks.enqueue(payload.into_task()?).await?;
            Ok(format!("{}/{}", info.queue, info.id))
        });
    }

    async fn invalidate_cache(&self, id: i64) {
        let key = user_cache_key(id);
        match self.cache.delete(&key).await {
            Ok(()) => {
                record_dispatch("cache_invalidate", true);
                debug!(key = %key, "Cache invalidated");
            }
            Err(e) => {
                record_dispatch("cache_invalidate", false);
                error!(key = %key, error = %e, "Failed to invalidate cache");
            }
        }
    }
}

/// 分离执行一次异步分发，结果只进入日志和指标
fn spawn_dispatch<F>(tracker: &TaskTracker, kind: &'static str, dispatch: F)
where
    F: Future<Output = AppResult<String>> + Send + 'static,
{
    tracker.spawn(
        async move {
            match dispatch.await {
                Ok(delivery_id) => {
                    record_dispatch(kind, true);
                    info!(kind, delivery_id = %delivery_id, "Async dispatch succeeded");
                }
                Err(e) => {
                    record_dispatch(kind, false);
                    error!(kind, error = %e, "Async dispatch failed");
                }
            }
        }
        .in_current_span(),
    );
}

/// 邮箱未被占用时返回 Ok
async fn ensure_email_available<Tx: Send + 'static>(
    repo: &dyn UserRepository<Tx>,
    scope: &ExecutionScope<Tx>,
    email: &str,
) -> AppResult<()> {
    match repo.get_by_email(scope, email).await {
        Ok(_) => Err(AppError::conflict(EMAIL_EXISTS)),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl<B: TransactionBackend> UserUsecase for UserService<B> {
    async fn create_user(&self, request: CreateUserRequest) -> AppResult<UserResponse> {
        request.validate()?;
        ensure_email_available(self.repo.as_ref(), &ExecutionScope::NoScope, &request.email)
            .await?;

        let new_user = NewUser {
            email: request.email,
            name: request.name,
            password_hash: hash_password(request.password).await?,
        };

        let repo = self.repo.as_ref();
        let user = self
            .transactions
            .run_in_transaction(&ExecutionScope::NoScope, move |scope| async move {
                repo.create(&scope, new_user).await
            })
            .await?;
        info!(user_id = user.id, "User created");

        let trace = current_trace().unwrap_or_else(TraceContext::new_root);
        let message = user_created_message(&user);
        self.publish_detached(message.clone(), &trace);
        self.enqueue_telegram_detached(message, &trace);

        Ok(UserResponse::from(&user))
    }

    async fn get_user(&self, id: i64) -> AppResult<UserResponse> {
        let user = self.repo.get_by_id(&ExecutionScope::NoScope, id).await?;
        Ok(UserResponse::from(user))
    }

    async fn list_users(
        &self,
        pagination: PaginationParams,
        filters: FilterParams,
        sorts: Vec<SortParams>,
    ) -> AppResult<UserPage> {
        let scope = ExecutionScope::NoScope;
        let (users, total) = tokio::try_join!(
            self.repo.list(&scope, &pagination, &filters, &sorts),
            self.repo.count(&scope, &filters),
        )?;

        Ok(UserPage {
            users: users.iter().map(UserResponse::from).collect(),
            total,
        })
    }

    async fn update_user(&self, id: i64, request: UpdateUserRequest) -> AppResult<UserResponse> {
        request.validate()?;

        let repo = self.repo.as_ref();
        let user = self
            .transactions
            .run_in_transaction(&ExecutionScope::NoScope, move |scope| async move {
                let mut user = repo.get_by_id(&scope, id).await?;
                if let Some(email) = request.email() {
                    if email != user.email {
                        ensure_email_available(repo, &scope, email).await?;
                        user.email = email.to_string();
                    }
                }
                if let Some(name) = request.name() {
                    user.name = name.to_string();
                }
                user.updated_at = repo.update(&scope, &user).await?;
                Ok(user)
            })
            .await?;
        info!(user_id = user.id, "User updated");

        self.invalidate_cache(id).await;

        let trace = current_trace().unwrap_or_else(TraceContext::new_root);
        self.enqueue_telegram_detached(user_updated_message(&user), &trace);

        Ok(UserResponse::from(&user))
    }

    async fn delete_user(&self, id: i64) -> AppResult<()> {
        let repo = self.repo.as_ref();
        self.transactions
            .run_in_transaction(&ExecutionScope::NoScope, move |scope| async move {
                repo.delete(&scope, id).await
            })
            .await?;
        info!(user_id = id, "User deleted");

        self.invalidate_cache(id).await;
        Ok(())
    }
}
