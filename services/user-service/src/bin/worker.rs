//! userhub worker 入口
//!
//! 同时运行任务队列服务器和 user-created 订阅，任一退出即触发整体关闭。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info};
use user_service::application::TYPE_TELEGRAM_MESSAGE;
use user_service::infrastructure::TelegramClient;
use user_service::worker::{TelegramTaskHandler, UserCreatedHandler};
use userhub_adapter_kafka::KafkaSubscriber;
use userhub_adapter_redis::TaskServer;
use userhub_bootstrap::{
    ShutdownController, connect_redis, drain_with_grace, ensure_topics, init_runtime, queue_keys,
    task_server_config, user_created_subscription,
};
use userhub_config::AppConfig;
use userhub_errors::AppResult;

/// 任务服务器自身的宽限期之外再多等的时间
const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// 运行后台任务，结束时（无论成功与否）触发关闭
fn spawn_until_shutdown<F>(
    name: &'static str,
    controller: &ShutdownController,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    let controller = controller.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(()) => info!(task = name, "Stopped"),
            Err(e) => error!(task = name, error = %e, "Stopped with error"),
        }
        controller.shutdown();
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("config").context("failed to load config")?;
    let _metrics = init_runtime(&config)?;

    let redis = connect_redis(&config).await?;
    ensure_topics(&config).await?;

    let telegram = TelegramClient::from_config(&config.telegram)?;
    let mut task_server = TaskServer::new(
        redis,
        queue_keys(&config),
        task_server_config(&config.worker),
    );
    task_server.handle(
        TYPE_TELEGRAM_MESSAGE,
        Arc::new(TelegramTaskHandler::new(telegram)),
    );

    let subscriber = KafkaSubscriber::new(user_created_subscription(&config))?;

    let shutdown = ShutdownController::new();
    shutdown.listen_for_signals();

    let mut tasks = spawn_until_shutdown("task_server", &shutdown, task_server.run(shutdown.token()));
    let token = shutdown.token();
    let mut events = spawn_until_shutdown("user_created_subscriber", &shutdown, async move {
        subscriber
            .run(Arc::new(UserCreatedHandler::new()), token)
            .await
    });
    info!("Worker started");

    shutdown.wait().await;

    let grace = config.worker.shutdown_grace() + DRAIN_SLACK;
    if !drain_with_grace("task_server", &mut tasks, grace).await {
        tasks.abort();
    }
    if !drain_with_grace("user_created_subscriber", &mut events, grace).await {
        events.abort();
    }

    info!("Worker stopped");
    Ok(())
}
