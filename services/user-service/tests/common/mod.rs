//! 内存实现的事务后端、仓储、发布者、任务队列和缓存

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use user_service::application::{NotificationSettings, UserService};
use user_service::domain::{EMAIL_EXISTS, NewUser, USER_NOT_FOUND, User, UserRepository};
use userhub_adapter_postgres::TransactionManager;
use userhub_common::{FilterParams, PaginationParams, SortDirection, SortParams};
use userhub_errors::{AppError, AppResult};
use userhub_ports::{
    CachePort, EventPublisher, ExecutionScope, Task, TaskInfo, TaskQueue, TransactionBackend,
};

#[derive(Debug, Clone, Default)]
pub struct Store {
    next_id: i64,
    pub users: BTreeMap<i64, User>,
}

/// 事务期间独占整个 store，回滚时恢复开启时的快照
pub struct MemoryTx {
    guard: OwnedMutexGuard<Store>,
    backup: Store,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
}

#[async_trait]
impl TransactionBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        let guard = Arc::clone(&self.store).lock_owned().await;
        let backup = guard.clone();
        Ok(MemoryTx { guard, backup })
    }

    async fn commit(&self, _tx: MemoryTx) -> AppResult<()> {
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> AppResult<()> {
        let MemoryTx { mut guard, backup } = tx;
        *guard = backup;
        Ok(())
    }
}

pub type MemoryScope = ExecutionScope<MemoryTx>;

#[derive(Clone)]
pub struct MemoryUserRepository {
    store: Arc<Mutex<Store>>,
}

impl MemoryUserRepository {
    pub fn new(backend: &MemoryBackend) -> Self {
        Self {
            store: Arc::clone(&backend.store),
        }
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.users.len()
    }

    pub async fn stored(&self, id: i64) -> Option<User> {
        self.store.lock().await.users.get(&id).cloned()
    }

    async fn with_store<T, F>(&self, scope: &MemoryScope, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Store) -> AppResult<T> + Send,
        T: Send,
    {
        match scope {
            ExecutionScope::Active(handle) => {
                let mut guard = handle.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or_else(|| AppError::internal("transaction already finished"))?;
                f(&mut tx.guard)
            }
            ExecutionScope::NoScope => {
                let mut store = self.store.lock().await;
                f(&mut store)
            }
        }
    }
}

fn matches(user: &User, filters: &FilterParams) -> bool {
    let contains = |field: &str, value: &str| field.to_lowercase().contains(&value.to_lowercase());
    filters.iter().all(|(key, value)| match key {
        "name" => contains(&user.name, value),
        "email" => contains(&user.email, value),
        _ => true,
    })
}

fn compare(a: &User, b: &User, sort: &SortParams) -> Ordering {
    let ordering = match sort.column.as_str() {
        "id" => a.id.cmp(&b.id),
        "email" => a.email.cmp(&b.email),
        "name" => a.name.cmp(&b.name),
        "created_at" => a.created_at.cmp(&b.created_at),
        "updated_at" => a.updated_at.cmp(&b.updated_at),
        _ => Ordering::Equal,
    };
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

#[async_trait]
impl UserRepository<MemoryTx> for MemoryUserRepository {
    async fn create(&self, scope: &MemoryScope, user: NewUser) -> AppResult<User> {
        self.with_store(scope, move |store| {
            if store.users.values().any(|u| u.email == user.email) {
                return Err(AppError::conflict(EMAIL_EXISTS));
            }
            store.next_id += 1;
            let now = Utc::now();
            let created = User {
                id: store.next_id,
                email: user.email,
                name: user.name,
                password: user.password_hash,
                created_at: now,
                updated_at: now,
            };
            store.users.insert(created.id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn get_by_id(&self, scope: &MemoryScope, id: i64) -> AppResult<User> {
        self.with_store(scope, |store| {
            store
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
        })
        .await
    }

    async fn get_by_email(&self, scope: &MemoryScope, email: &str) -> AppResult<User> {
        self.with_store(scope, |store| {
            store
                .users
                .values()
                .find(|u| u.email == email)
                .cloned()
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
        })
        .await
    }

    async fn list(
        &self,
        scope: &MemoryScope,
        pagination: &PaginationParams,
        filters: &FilterParams,
        sorts: &[SortParams],
    ) -> AppResult<Vec<User>> {
        self.with_store(scope, |store| {
            let mut users: Vec<User> = store
                .users
                .values()
                .filter(|u| matches(u, filters))
                .cloned()
                .collect();
            users.sort_by(|a, b| {
                sorts
                    .iter()
                    .map(|s| compare(a, b, s))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            Ok(users
                .into_iter()
                .skip(pagination.offset as usize)
                .take(pagination.limit as usize)
                .collect())
        })
        .await
    }

    async fn update(&self, scope: &MemoryScope, user: &User) -> AppResult<DateTime<Utc>> {
        self.with_store(scope, |store| {
            if store
                .users
                .values()
                .any(|u| u.id != user.id && u.email == user.email)
            {
                return Err(AppError::conflict(EMAIL_EXISTS));
            }
            let stored = store
                .users
                .get_mut(&user.id)
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
            stored.email = user.email.clone();
            stored.name = user.name.clone();
            stored.updated_at = Utc::now();
            Ok(stored.updated_at)
        })
        .await
    }

    async fn delete(&self, scope: &MemoryScope, id: i64) -> AppResult<()> {
        self.with_store(scope, |store| {
            store
                .users
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
        })
        .await
    }

    async fn count(&self, scope: &MemoryScope, filters: &FilterParams) -> AppResult<i64> {
        self.with_store(scope, |store| {
            Ok(store.users.values().filter(|u| matches(u, filters)).count() as i64)
        })
        .await
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub data: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: StdMutex<Vec<Published>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        data: &[u8],
        attributes: HashMap<String, String>,
    ) -> AppResult<String> {
        let mut published = self.published.lock().unwrap();
        published.push(Published {
            topic: topic.to_string(),
            data: String::from_utf8_lossy(data).into_owned(),
            attributes,
        });
        Ok(format!("{}/0/{}", topic, published.len() - 1))
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    pub tasks: StdMutex<Vec<Task>>,
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(task.clone());
        Ok(TaskInfo {
            id: format!("task-{}", tasks.len()),
            queue: task.queue,
        })
    }
}

#[derive(Default)]
pub struct RecordingCache {
    pub entries: StdMutex<HashMap<String, String>>,
    pub deleted: StdMutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingCache {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CachePort for RecordingCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if self.fail {
            return Err(AppError::unavailable("redis is down"));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> AppResult<()> {
        if self.fail {
            return Err(AppError::unavailable("redis is down"));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        if self.fail {
            return Err(AppError::unavailable("redis is down"));
        }
        self.entries.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// 组装好的用例和它的协作者
pub struct Harness {
    pub service: Arc<UserService<MemoryBackend>>,
    pub backend: MemoryBackend,
    pub repo: MemoryUserRepository,
    pub publisher: Arc<RecordingPublisher>,
    pub queue: Arc<RecordingQueue>,
    pub cache: Arc<RecordingCache>,
}

pub fn settings() -> NotificationSettings {
    NotificationSettings {
        topic_user_created: "user-created".to_string(),
        telegram_chat_id: "12345".to_string(),
    }
}

impl Harness {
    pub fn new() -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        Self::build(
            publisher.clone(),
            publisher,
            Arc::new(RecordingCache::default()),
        )
    }

    /// 替换事件发布者，此时 `publisher` 字段不再记录任何内容
    pub fn with_publisher(publisher: Arc<dyn EventPublisher>) -> Self {
        Self::build(
            publisher,
            Arc::new(RecordingPublisher::default()),
            Arc::new(RecordingCache::default()),
        )
    }

    pub fn with_cache(cache: RecordingCache) -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        Self::build(publisher.clone(), publisher, Arc::new(cache))
    }

    fn build(
        publisher: Arc<dyn EventPublisher>,
        recording: Arc<RecordingPublisher>,
        cache: Arc<RecordingCache>,
    ) -> Self {
        let backend = MemoryBackend::default();
        let repo = MemoryUserRepository::new(&backend);
        let queue = Arc::new(RecordingQueue::default());
        let service = UserService::<MemoryBackend>::new(
            Arc::new(repo.clone()),
            TransactionManager::new(backend.clone()),
            publisher,
            queue.clone(),
            cache.clone(),
            settings(),
        );

        Self {
            service: Arc::new(service),
            backend,
            repo,
            publisher: recording,
            queue,
            cache,
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.publisher.published.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.queue.tasks.lock().unwrap().clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.cache.deleted.lock().unwrap().clone()
    }
}

/// 等待分离任务产生结果
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 确认分离任务在给定时间内没有产生结果
pub async fn never<F>(mut condition: F, within: Duration)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        assert!(!condition(), "condition unexpectedly met");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn spawn_all<F, T>(futures: Vec<F>) -> Vec<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.into_iter().map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}
