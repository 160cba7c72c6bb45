//! userhub-telemetry - 可观测性库
//!
//! 日志初始化、Prometheus 指标、trace 上下文传播和敏感参数脱敏。

mod mask;
mod trace_context;

pub use mask::{SENSITIVE_KEYS, mask_sensitive};
pub use trace_context::{TRACEPARENT_HEADER, TraceContext, current_trace, with_trace};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(String),
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 按配置选择日志格式
pub fn init(log_level: &str, json: bool) {
    if json {
        init_tracing_json(log_level);
    } else {
        init_tracing(log_level);
    }
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))
}

/// 异步分发结果计数，`kind` 为 publish / enqueue / cache_invalidate
pub fn record_dispatch(kind: &'static str, ok: bool) {
    metrics::counter!(
        "userhub_dispatch_total",
        "kind" => kind,
        "outcome" => outcome(ok)
    )
    .increment(1);
}

/// 任务处理结果计数
pub fn record_task(task_type: &str, outcome: &'static str) {
    metrics::counter!(
        "userhub_tasks_processed_total",
        "type" => task_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// 订阅消息处理结果计数
pub fn record_message(topic: &str, outcome: &'static str) {
    metrics::counter!(
        "userhub_messages_received_total",
        "topic" => topic.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

fn outcome(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}
