//! 服务运行时

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;
use userhub_config::AppConfig;
use userhub_errors::{AppError, AppResult};
use userhub_telemetry::{init, init_metrics};

/// 初始化服务运行时：日志与 metrics
///
/// 生产环境总是输出 JSON 日志。
pub fn init_runtime(config: &AppConfig) -> AppResult<PrometheusHandle> {
    init(
        &config.telemetry.log_level,
        config.telemetry.json || config.is_production(),
    );

    let handle = init_metrics().map_err(|e| AppError::internal(e.to_string()))?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
    Ok(handle)
}
