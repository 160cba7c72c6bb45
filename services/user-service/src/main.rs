//! userhub API 服务入口

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use user_service::api::http::{AppState, build_router};
use user_service::application::{NotificationSettings, UserService};
use user_service::domain::UserRepository;
use user_service::infrastructure::{MIGRATOR, PostgresUserRepository};
use userhub_adapter_postgres::{PgTx, TransactionManager, run_migrations};
use userhub_bootstrap::{
    HealthChecker, Infrastructure, ShutdownController, drain_with_grace, init_runtime,
};
use userhub_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("config").context("failed to load config")?;
    let metrics = init_runtime(&config)?;

    let infra = Infrastructure::from_config(config).await?;
    let config = infra.config().clone();
    let pool = infra.postgres_pool();
    run_migrations(&pool, &MIGRATOR).await?;

    let repo: Arc<dyn UserRepository<PgTx>> = Arc::new(PostgresUserRepository::new(pool.clone()));
    let usecase: Arc<UserService> = Arc::new(UserService::new(
        repo,
        TransactionManager::postgres(pool.clone()),
        infra.event_publisher(),
        Arc::new(infra.task_queue()),
        Arc::new(infra.redis_cache()),
        NotificationSettings {
            topic_user_created: config.kafka.topic_user_created.clone(),
            telegram_chat_id: config.telegram.chat_id.clone(),
        },
    ));

    let app = build_router(AppState {
        usecase: usecase.clone(),
        cache: Arc::new(infra.redis_cache()),
        health: HealthChecker::for_infrastructure(pool, infra.redis_connection_manager()),
        metrics: Some(metrics),
        cache_ttl: config.cache.ttl(),
    });

    let shutdown = ShutdownController::new();
    shutdown.listen_for_signals();

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Starting HTTP server");

    let token = shutdown.token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    });

    let exited = tokio::select! {
        joined = &mut server => Some(joined),
        _ = shutdown.wait() => None,
    };

    match exited {
        Some(joined) => joined.context("HTTP server task failed")??,
        None => {
            if !drain_with_grace("http_server", &mut server, config.server.shutdown_grace()).await {
                server.abort();
            }
        }
    }

    usecase
        .drain_dispatches(config.server.shutdown_grace())
        .await;
    infra.flush();
    info!("Server stopped");
    Ok(())
}
