//! Graceful Shutdown

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shutdown 控制器
///
/// 所有长期运行的任务共享同一个取消令牌。
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子令牌，随控制器一起取消
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// 收到 SIGINT/SIGTERM 时触发关闭
    pub fn listen_for_signals(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            controller.shutdown();
        });
    }
}

/// 等待关闭信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// 在宽限期内等待任务结束，超时返回 false
pub async fn drain_with_grace<F>(name: &str, task: F, grace: Duration) -> bool
where
    F: Future,
{
    match tokio::time::timeout(grace, task).await {
        Ok(_) => {
            info!(task = %name, "Drained");
            true
        }
        Err(_) => {
            warn!(task = %name, grace_secs = grace.as_secs(), "Grace period elapsed, giving up");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_tokens_follow_controller() {
        let controller = ShutdownController::new();
        let first = controller.token();
        let second = controller.token();

        assert!(!first.is_cancelled());
        controller.shutdown();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(controller.is_shutdown());
        controller.wait().await;
    }

    #[tokio::test]
    async fn test_drain_with_grace() {
        assert!(drain_with_grace("fast", async {}, Duration::from_millis(50)).await);

        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert!(!drain_with_grace("slow", slow, Duration::from_millis(10)).await);
    }
}
