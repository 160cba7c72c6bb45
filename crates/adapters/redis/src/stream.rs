//! Redis Stream 模块
//!
//! 对 XADD / XREADGROUP / XACK / XDEL / XPENDING / XCLAIM 的薄封装。
//! stream 名由调用方给出完整 key，这里不再拼前缀。

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::{RedisResult, Value};
use serde::Deserialize;
use tracing::{debug, info};
use userhub_errors::{AppError, AppResult};

/// Stream 消息
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// 消息 ID
    pub id: String,
    /// Stream 名称
    pub stream: String,
    /// 消息字段
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    /// 获取字段值
    pub fn get(&self, key: &str) -> Option<&String> {
        self.fields.get(key)
    }

    /// 获取 JSON 字段并解析
    pub fn get_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> AppResult<Option<T>> {
        match self.fields.get(key) {
            Some(value) => {
                let parsed = serde_json::from_str(value)
                    .map_err(|e| AppError::validation(format!("Failed to parse JSON: {}", e)))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}

/// 待处理消息信息
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: String,
    pub consumer: String,
    /// 空闲时间（毫秒）
    pub idle_ms: u64,
    /// 投递次数
    pub delivery_count: u64,
}

/// Stream 生产者
#[derive(Clone)]
pub struct StreamProducer {
    conn: ConnectionManager,
}

impl StreamProducer {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// 添加消息到 Stream，返回 Redis 分配的消息 ID
    pub async fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> AppResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(*key).arg(*value);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XADD: {}", e)))?;

        debug!(stream = %stream, id = %id, "Message added to stream");
        Ok(id)
    }
}

/// Stream 消费者（消费者组成员）
#[derive(Clone)]
pub struct StreamConsumer {
    conn: ConnectionManager,
    group: String,
    consumer: String,
}

impl StreamConsumer {
    pub fn new(conn: ConnectionManager, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            conn,
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// 创建消费者组（如果不存在），stream 不存在时一并创建
    pub async fn create_group(&self, stream: &str, start_id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(AppError::internal(format!("Failed to create group: {}", e))),
        }
    }

    /// 读取新消息，`block_ms` 为 None 时不阻塞
    pub async fn read_group(
        &self,
        streams: &[&str],
        count: usize,
        block_ms: Option<u64>,
    ) -> AppResult<Vec<StreamMessage>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count);
        if let Some(block_ms) = block_ms {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS");
        for stream in streams {
            cmd.arg(*stream);
        }
        for _ in streams {
            cmd.arg(">");
        }

        let mut conn = self.conn.clone();
        let result: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XREADGROUP: {}", e)))?;

        Ok(parse_xread_response(result))
    }

    /// 确认消息
    pub async fn ack(&self, stream: &str, ids: &[&str]) -> AppResult<usize> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(&self.group);
        for id in ids {
            cmd.arg(*id);
        }

        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XACK: {}", e)))
    }

    /// 删除消息
    pub async fn delete(&self, stream: &str, ids: &[&str]) -> AppResult<usize> {
        let mut cmd = redis::cmd("XDEL");
        cmd.arg(stream);
        for id in ids {
            cmd.arg(*id);
        }

        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XDEL: {}", e)))
    }

    /// 确认并删除，处理完成的任务不保留在 stream 中
    pub async fn ack_and_delete(&self, stream: &str, id: &str) -> AppResult<()> {
        self.ack(stream, &[id]).await?;
        self.delete(stream, &[id]).await?;
        Ok(())
    }

    /// 读取待处理消息（已投递未确认）
    pub async fn pending(&self, stream: &str, count: usize) -> AppResult<Vec<PendingMessage>> {
        let mut conn = self.conn.clone();
        let result: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XPENDING: {}", e)))?;

        Ok(parse_xpending_response(result))
    }

    /// 认领空闲超过 `min_idle_ms` 的消息
    pub async fn claim(
        &self,
        stream: &str,
        min_idle_ms: u64,
        ids: &[&str],
    ) -> AppResult<Vec<StreamMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle_ms);
        for id in ids {
            cmd.arg(*id);
        }

        let mut conn = self.conn.clone();
        let result: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to XCLAIM: {}", e)))?;

        Ok(parse_entries(&result, stream))
    }
}

fn bulk_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_fields(value: &Value) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    if let Value::Array(items) = value {
        let mut iter = items.iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            if let (Some(k), Some(v)) = (bulk_to_string(key), bulk_to_string(value)) {
                fields.insert(k, v);
            }
        }
    }
    fields
}

/// 解析 `[[id, [k, v, ...]], ...]`
fn parse_entries(value: &Value, stream: &str) -> Vec<StreamMessage> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Array(parts) if parts.len() >= 2 => Some(StreamMessage {
                id: bulk_to_string(&parts[0])?,
                stream: stream.to_string(),
                fields: parse_fields(&parts[1]),
            }),
            _ => None,
        })
        .collect()
}

/// 解析 XREADGROUP 响应：`[[stream, entries], ...]`，无消息时为 Nil
fn parse_xread_response(value: Value) -> Vec<StreamMessage> {
    let Value::Array(streams) = value else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for stream_data in &streams {
        if let Value::Array(parts) = stream_data {
            if parts.len() < 2 {
                continue;
            }
            if let Some(name) = bulk_to_string(&parts[0]) {
                messages.extend(parse_entries(&parts[1], &name));
            }
        }
    }
    messages
}

/// 解析 XPENDING 扩展形式响应：`[[id, consumer, idle, count], ...]`
fn parse_xpending_response(value: Value) -> Vec<PendingMessage> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Array(parts) if parts.len() >= 4 => {
                let idle_ms = match &parts[2] {
                    Value::Int(i) => *i as u64,
                    _ => return None,
                };
                let delivery_count = match &parts[3] {
                    Value::Int(i) => *i as u64,
                    _ => return None,
                };
                Some(PendingMessage {
                    id: bulk_to_string(&parts[0])?,
                    consumer: bulk_to_string(&parts[1])?,
                    idle_ms,
                    delivery_count,
                })
            }
            _ => None,
        })
        .collect()
}
