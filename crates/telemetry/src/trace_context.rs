//! W3C traceparent 形式的 trace 上下文
//!
//! 格式：`00-{trace_id 32 hex}-{span_id 16 hex}-{flags 2 hex}`。
//! 只做传播和日志关联，不导出到外部 tracing 后端。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 载体中的 key
pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    /// 新的根上下文
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            sampled: true,
        }
    }

    /// 同一 trace 下的子 span
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            sampled: self.sampled,
        }
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("{}-{}-{}-{}", VERSION, self.trace_id, self.span_id, flags)
    }

    /// 解析 traceparent，格式不合法时返回 None
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != VERSION {
            return None;
        }
        if !is_hex(trace_id, 32) || !is_hex(span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        // 全零 id 无效
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// 写入载体（消息头、任务属性）
    pub fn inject(&self, carrier: &mut HashMap<String, String>) {
        carrier.insert(TRACEPARENT_HEADER.to_string(), self.to_traceparent());
    }

    /// 从载体读取
    pub fn extract(carrier: &HashMap<String, String>) -> Option<Self> {
        carrier
            .get(TRACEPARENT_HEADER)
            .and_then(|value| Self::parse(value))
    }

    /// 从载体读取，没有则生成新的根上下文
    pub fn extract_or_new(carrier: &HashMap<String, String>) -> Self {
        Self::extract(carrier).unwrap_or_else(Self::new_root)
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_traceparent())
    }
}

tokio::task_local! {
    static CURRENT: TraceContext;
}

/// 在给定 trace 上下文中执行 `fut`，期间 [`current_trace`] 返回它
pub async fn with_trace<F: Future>(context: TraceContext, fut: F) -> F::Output {
    CURRENT.scope(context, fut).await
}

/// 当前任务的 trace 上下文
///
/// `tokio::spawn` 出去的任务不继承，需要在 spawn 之前取出。
pub fn current_trace() -> Option<TraceContext> {
    CURRENT.try_with(Clone::clone).ok()
}

fn new_span_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}
