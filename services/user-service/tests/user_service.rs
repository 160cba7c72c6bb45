//! 用户用例集成测试
//!
//! 使用内存事务后端和记录型协作者，覆盖事务边界、唯一性和提交后的异步副作用。

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use user_service::application::{
    CreateUserRequest, TYPE_TELEGRAM_MESSAGE, TelegramMessagePayload, UpdateUserRequest,
    UserUsecase, user_cache_key,
};
use user_service::domain::{NewUser, UserRepository, verify_password};
use userhub_adapter_postgres::TransactionManager;
use userhub_common::{FilterParams, PaginationParams, SortParams};
use userhub_errors::{AppError, AppResult, ErrorKind};
use userhub_ports::{EventPublisher, ExecutionScope};
use userhub_telemetry::{TRACEPARENT_HEADER, TraceContext, with_trace};

use common::{Harness, MemoryUserRepository, RecordingCache, eventually, never, spawn_all};

mock! {
    Publisher {}

    #[async_trait]
    impl EventPublisher for Publisher {
        async fn publish(
            &self,
            topic: &str,
            data: &[u8],
            attributes: HashMap<String, String>,
        ) -> AppResult<String>;
    }
}

fn create_request(email: &str, name: &str) -> CreateUserRequest {
    CreateUserRequest {
        email: email.to_string(),
        name: name.to_string(),
        password: "secret123".to_string(),
    }
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        name: "someone".to_string(),
        password_hash: "hash".to_string(),
    }
}

#[tokio::test]
async fn test_create_then_get() {
    let h = Harness::new();

    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();
    assert!(created.id > 0);
    assert_eq!(created.email, "alice@example.com");
    assert_eq!(created.name, "alice");

    let fetched = h.service.get_user(created.id).await.unwrap();
    assert_eq!(fetched, created);

    let stored = h.repo.stored(created.id).await.unwrap();
    assert_ne!(stored.password, "secret123");
    assert!(verify_password("secret123", &stored.password).unwrap());

    let body = serde_json::to_value(&fetched).unwrap();
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn test_create_dispatches_event_and_telegram_task() {
    let h = Harness::new();

    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    eventually(|| !h.published().is_empty() && !h.tasks().is_empty()).await;

    let published = h.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "user-created");
    assert_eq!(
        published[0].data,
        "New user created: alice (alice@example.com)"
    );
    assert!(published[0].attributes.contains_key(TRACEPARENT_HEADER));

    let tasks = h.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TYPE_TELEGRAM_MESSAGE);
    let payload: TelegramMessagePayload = serde_json::from_slice(&tasks[0].payload).unwrap();
    assert_eq!(payload.chat_id, "12345");
    assert_eq!(payload.text, "New user created: alice (alice@example.com)");

    // 创建不触发缓存失效
    assert!(h.deleted_keys().is_empty());
    assert!(h.repo.stored(created.id).await.is_some());
}

#[tokio::test]
async fn test_dispatch_continues_request_trace() {
    let h = Harness::new();
    let request_trace = TraceContext::new_root();

    with_trace(
        request_trace.clone(),
        h.service
            .create_user(create_request("alice@example.com", "alice")),
    )
    .await
    .unwrap();

    eventually(|| !h.published().is_empty() && !h.tasks().is_empty()).await;

    let event_trace = TraceContext::extract(&h.published()[0].attributes).unwrap();
    assert_eq!(event_trace.trace_id, request_trace.trace_id);
    assert_ne!(event_trace.span_id, request_trace.span_id);

    let payload: TelegramMessagePayload = serde_json::from_slice(&h.tasks()[0].payload).unwrap();
    assert_eq!(payload.trace().trace_id, request_trace.trace_id);
}

#[tokio::test]
async fn test_create_duplicate_email_conflicts() {
    let h = Harness::new();
    h.service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    let err = h
        .service
        .create_user(create_request("alice@example.com", "another"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.message(), "email already exists");
    assert_eq!(h.repo.len().await, 1);
}

#[tokio::test]
async fn test_create_rejects_invalid_request_before_storing() {
    let h = Harness::new();

    let cases = [
        create_request("", "alice"),
        create_request("not-an-email", "alice"),
        create_request("alice@example.com", "al"),
        CreateUserRequest {
            password: "12345".to_string(),
            ..create_request("alice@example.com", "alice")
        },
    ];
    for request in cases {
        let err = h.service.create_user(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    assert_eq!(h.repo.len().await, 0);
    never(|| !h.published().is_empty(), Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_create() {
    let attempted = Arc::new(AtomicBool::new(false));
    let mut publisher = MockPublisher::new();
    let flag = Arc::clone(&attempted);
    publisher.expect_publish().returning(move |_, _, _| {
        flag.store(true, Ordering::SeqCst);
        Err(AppError::external_service("kafka is down"))
    });
    let h = Harness::with_publisher(Arc::new(publisher));

    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    assert!(h.repo.stored(created.id).await.is_some());
    eventually(|| attempted.load(Ordering::SeqCst)).await;
    // 入队不受发布失败影响
    eventually(|| !h.tasks().is_empty()).await;
}

struct SlowPublisher(Duration);

#[async_trait]
impl EventPublisher for SlowPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _data: &[u8],
        _attributes: HashMap<String, String>,
    ) -> AppResult<String> {
        tokio::time::sleep(self.0).await;
        Ok("slow-1".to_string())
    }
}

#[tokio::test]
async fn test_drain_waits_for_pending_dispatches() {
    let h = Harness::new();
    h.service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    assert!(h.service.drain_dispatches(Duration::from_secs(5)).await);
    assert_eq!(h.published().len(), 1);
    assert_eq!(h.tasks().len(), 1);
}

#[tokio::test]
async fn test_drain_gives_up_after_grace() {
    let h = Harness::with_publisher(Arc::new(SlowPublisher(Duration::from_secs(5))));
    h.service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    assert!(!h.service.drain_dispatches(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_update_name_only_keeps_email() {
    let h = Harness::new();
    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();
    eventually(|| h.tasks().len() == 1 && h.published().len() == 1).await;

    let updated = h
        .service
        .update_user(
            created.id,
            UpdateUserRequest {
                email: None,
                name: Some("alice2".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "alice2");
    assert_eq!(updated.email, "alice@example.com");
    assert!(updated.updated_at >= created.updated_at);

    assert_eq!(h.deleted_keys(), vec![user_cache_key(created.id)]);
    assert_eq!(
        user_cache_key(created.id),
        format!("cache:/api/v1/users/{}", created.id)
    );

    eventually(|| h.tasks().len() == 2).await;
    let payload: TelegramMessagePayload = serde_json::from_slice(&h.tasks()[1].payload).unwrap();
    assert_eq!(payload.text, "User updated: alice2 (alice@example.com)");

    // 更新不发布 user-created 事件
    assert_eq!(h.published().len(), 1);
}

#[tokio::test]
async fn test_update_with_empty_request_succeeds() {
    let h = Harness::new();
    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    let updated = h
        .service
        .update_user(
            created.id,
            UpdateUserRequest {
                email: Some(String::new()),
                name: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.email, created.email);
    assert_eq!(updated.name, created.name);
    assert!(updated.updated_at >= created.updated_at);

    // 空更新仍然写库，只刷新 updated_at
    let stored = h.repo.stored(created.id).await.unwrap();
    assert_eq!(stored.email, created.email);
    assert_eq!(stored.name, created.name);
    assert_eq!(stored.updated_at, updated.updated_at);
}

#[tokio::test]
async fn test_update_to_taken_email_conflicts() {
    let h = Harness::new();
    h.service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();
    let bob = h
        .service
        .create_user(create_request("bob@example.com", "bob"))
        .await
        .unwrap();

    let err = h
        .service
        .update_user(
            bob.id,
            UpdateUserRequest {
                email: Some("alice@example.com".to_string()),
                name: Some("bobby".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let stored = h.repo.stored(bob.id).await.unwrap();
    assert_eq!(stored.email, "bob@example.com");
    assert_eq!(stored.name, "bob");
    assert!(h.deleted_keys().is_empty());
}

#[tokio::test]
async fn test_update_to_own_email_is_not_a_conflict() {
    let h = Harness::new();
    let alice = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    let updated = h
        .service
        .update_user(
            alice.id,
            UpdateUserRequest {
                email: Some("alice@example.com".to_string()),
                name: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.email, "alice@example.com");
}

#[tokio::test]
async fn test_update_missing_user_is_not_found() {
    let h = Harness::new();

    let err = h
        .service
        .update_user(
            42,
            UpdateUserRequest {
                email: None,
                name: Some("nobody".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.deleted_keys().is_empty());
}

#[tokio::test]
async fn test_delete_twice_is_not_found() {
    let h = Harness::new();
    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    h.service.delete_user(created.id).await.unwrap();
    assert_eq!(h.deleted_keys(), vec![user_cache_key(created.id)]);
    assert!(h.service.get_user(created.id).await.unwrap_err().is_not_found());

    for _ in 0..2 {
        let err = h.service.delete_user(created.id).await.unwrap_err();
        assert!(err.is_not_found());
    }
    assert_eq!(h.deleted_keys().len(), 1);
}

#[tokio::test]
async fn test_cache_invalidation_failure_is_swallowed() {
    let h = Harness::with_cache(RecordingCache::failing());
    let created = h
        .service
        .create_user(create_request("alice@example.com", "alice"))
        .await
        .unwrap();

    h.service
        .update_user(
            created.id,
            UpdateUserRequest {
                email: None,
                name: Some("alice2".to_string()),
            },
        )
        .await
        .unwrap();
    h.service.delete_user(created.id).await.unwrap();

    assert!(h.repo.stored(created.id).await.is_none());
}

#[tokio::test]
async fn test_list_paginates_and_counts() {
    let h = Harness::new();
    for i in 0..25 {
        h.service
            .create_user(create_request(
                &format!("user{:02}@example.com", i),
                &format!("user{:02}", i),
            ))
            .await
            .unwrap();
    }

    let page = h
        .service
        .list_users(
            PaginationParams::new(3, 10),
            FilterParams::new(),
            vec![SortParams::asc("id")],
        )
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.users.len(), 5);
    assert_eq!(page.users[0].name, "user20");

    let page = h
        .service
        .list_users(
            PaginationParams::new(1, 3),
            FilterParams::new(),
            vec![SortParams::desc("name")],
        )
        .await
        .unwrap();
    let names: Vec<_> = page.users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["user24", "user23", "user22"]);
}

#[tokio::test]
async fn test_list_filters_are_case_insensitive() {
    let h = Harness::new();
    for (email, name) in [
        ("alice@example.com", "Alice"),
        ("bob@example.com", "Bob"),
        ("alicia@test.io", "Alicia"),
    ] {
        h.service
            .create_user(create_request(email, name))
            .await
            .unwrap();
    }

    let page = h
        .service
        .list_users(
            PaginationParams::new(1, 10),
            FilterParams::new().with("name", "ALI"),
            vec![SortParams::asc("id")],
        )
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.users.len(), 2);

    let page = h
        .service
        .list_users(
            PaginationParams::new(1, 10),
            FilterParams::new()
                .with("name", "ali")
                .with("email", "example"),
            vec![SortParams::asc("id")],
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.users[0].name, "Alice");
}

#[tokio::test]
async fn test_failed_second_write_rolls_back_first() {
    let h = Harness::new();
    let repo = h.repo.clone();
    let transactions = TransactionManager::new(h.backend.clone());

    let err = transactions
        .run_in_transaction(&ExecutionScope::NoScope, |scope| async move {
            repo.create(&scope, new_user("first@example.com")).await?;
            repo.create(&scope, new_user("first@example.com")).await
        })
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(h.repo.len().await, 0);
    assert!(
        h.repo
            .get_by_email(&ExecutionScope::NoScope, "first@example.com")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_nested_transaction_joins_outer_scope() {
    let h = Harness::new();
    let repo = h.repo.clone();
    let transactions = TransactionManager::new(h.backend.clone());

    let inner = transactions.clone();
    let result: AppResult<()> = transactions
        .run_in_transaction(&ExecutionScope::NoScope, |scope| async move {
            let nested_repo = repo.clone();
            inner
                .run_in_transaction(&scope, |joined| async move {
                    nested_repo.create(&joined, new_user("inner@example.com")).await
                })
                .await?;
            // 内层复用外层事务，外层失败时一起回滚
            let _ = repo.get_by_email(&scope, "inner@example.com").await?;
            Err(AppError::internal("outer failed"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(h.repo.len().await, 0);
}

#[tokio::test]
async fn test_concurrent_creates_get_distinct_ids() {
    let h = Harness::new();

    let futures: Vec<_> = (0..50)
        .map(|i| {
            let service = Arc::clone(&h.service);
            async move {
                service
                    .create_user(create_request(
                        &format!("user{}@example.com", i),
                        &format!("user{:02}", i),
                    ))
                    .await
            }
        })
        .collect();
    let results = spawn_all(futures).await;

    let mut ids: Vec<i64> = results.into_iter().map(|r| r.unwrap().id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
    assert_eq!(h.repo.len().await, 50);
}

#[tokio::test]
async fn test_concurrent_same_email_single_winner() {
    let h = Harness::new();

    let futures: Vec<_> = (0..2)
        .map(|i| {
            let service = Arc::clone(&h.service);
            async move {
                service
                    .create_user(create_request("race@example.com", &format!("racer{}", i)))
                    .await
            }
        })
        .collect();
    let results = spawn_all(futures).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(h.repo.len().await, 1);
}

#[tokio::test]
async fn test_reads_do_not_dispatch() {
    let h = Harness::new();
    let repo = MemoryUserRepository::clone(&h.repo);
    repo.create(&ExecutionScope::NoScope, new_user("seed@example.com"))
        .await
        .unwrap();

    h.service.get_user(1).await.unwrap();
    h.service
        .list_users(PaginationParams::new(1, 10), FilterParams::new(), vec![])
        .await
        .unwrap();

    never(
        || !h.published().is_empty() || !h.tasks().is_empty(),
        Duration::from_millis(100),
    )
    .await;
    assert!(h.deleted_keys().is_empty());
}
