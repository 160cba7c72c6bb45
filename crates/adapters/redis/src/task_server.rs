//! 任务队列 worker
//!
//! - 按权重随机决定每次取任务时各队列的检查顺序（非严格优先级）
//! - 信号量限制同时执行的任务数
//! - 处理成功：XACK + XDEL
//! - 可重试失败或 panic：写入延迟 ZSET，由调度循环到期后放回原队列；超过 `max_retry` 后归档
//! - 不可重试失败：直接归档
//! - 消费者崩溃后遗留的未确认消息，空闲超过 `claim_idle` 后被其它 worker 认领
//!
//! 结果记录（ZSET 或归档）成功之后才确认 stream 消息，因此任务至少执行一次。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use userhub_common::RetryConfig;
use userhub_errors::{AppError, AppResult};
use userhub_ports::{TaskError, TaskHandler};
use userhub_telemetry::record_task;

use crate::stream::{StreamConsumer, StreamMessage};
use crate::task_queue::{QueueKeys, TASK_FIELD, TaskMessage};

/// 归档保留条数
const ARCHIVE_MAX_LEN: isize = 10_000;

/// 每次调度最多搬运的到期任务数
const PROMOTE_BATCH: usize = 100;

/// 把到期任务从 ZSET 原子地搬回各自的队列 stream
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, member in ipairs(due) do
    local task = cjson.decode(member)
    if redis.call('ZREM', KEYS[1], member) == 1 then
        redis.call('XADD', ARGV[3] .. task['queue'], '*', ARGV[4], member)
    end
end
return #due
";

/// worker 配置
#[derive(Debug, Clone)]
pub struct TaskServerConfig {
    /// 消费者名，同一消费者组内唯一
    pub consumer_name: String,
    pub concurrency: usize,
    /// 队列名 -> 权重
    pub queues: BTreeMap<String, u32>,
    /// 重试退避
    pub retry: RetryConfig,
    /// 所有队列都为空时的轮询间隔
    pub poll_interval: Duration,
    pub scheduler_interval: Duration,
    /// 未确认消息空闲多久后可被认领，应大于最长任务耗时
    pub claim_idle: Duration,
    pub shutdown_grace: Duration,
}

impl Default for TaskServerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "userhub-worker".to_string(),
            concurrency: 10,
            queues: BTreeMap::from([
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1),
            ]),
            retry: RetryConfig::new(u32::MAX, Duration::from_secs(1), Duration::from_secs(600)),
            poll_interval: Duration::from_millis(500),
            scheduler_interval: Duration::from_secs(1),
            claim_idle: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(8),
        }
    }
}

/// 任务 worker
pub struct TaskServer {
    conn: ConnectionManager,
    keys: QueueKeys,
    config: TaskServerConfig,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskServer {
    pub fn new(conn: ConnectionManager, keys: QueueKeys, config: TaskServerConfig) -> Self {
        Self {
            conn,
            keys,
            config,
            handlers: HashMap::new(),
        }
    }

    /// 注册任务类型的处理器
    pub fn handle(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// 运行直到 `shutdown` 被取消，然后在宽限期内等待进行中的任务
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        let consumer = StreamConsumer::new(
            self.conn.clone(),
            self.keys.group(),
            self.config.consumer_name.clone(),
        );
        let weights: Vec<(String, u32)> = self
            .config
            .queues
            .iter()
            .map(|(name, weight)| (name.clone(), *weight))
            .collect();
        if weights.is_empty() {
            return Err(AppError::validation("task server needs at least one queue"));
        }
        for (queue, _) in &weights {
            consumer.create_group(&self.keys.stream(queue), "0").await?;
        }

        let processor = Arc::new(Processor {
            consumer: consumer.clone(),
            conn: self.conn.clone(),
            keys: self.keys.clone(),
            handlers: self.handlers,
            retry: self.config.retry.clone(),
        });

        let scheduler = tokio::spawn(run_scheduler(
            self.conn.clone(),
            self.keys.clone(),
            self.config.scheduler_interval,
            shutdown.clone(),
        ));

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut backlog: VecDeque<StreamMessage> = VecDeque::new();
        let mut last_reclaim: Option<Instant> = None;

        info!(
            consumer = %self.config.consumer_name,
            concurrency,
            queues = ?self.config.queues,
            "Task server started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if last_reclaim.is_none_or(|at| at.elapsed() >= self.config.claim_idle) {
                match reclaim_stale(&consumer, &self.keys, &weights, self.config.claim_idle).await {
                    Ok(messages) => backlog.extend(messages),
                    Err(e) => warn!(error = %e, "Failed to reclaim stale tasks"),
                }
                last_reclaim = Some(Instant::now());
            }

            let next = match backlog.pop_front() {
                Some(message) => Some(message),
                None => match fetch_next(&consumer, &self.keys, &weights).await {
                    Ok(message) => message,
                    Err(e) => {
                        error!(error = %e, "Failed to fetch task");
                        None
                    }
                },
            };

            match next {
                Some(message) => {
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        processor.handle_message(message).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    if sleep_or_cancel(&shutdown, self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!("Task server stopping, waiting for in-flight tasks");
        match tokio::time::timeout(
            self.config.shutdown_grace,
            semaphore.acquire_many(concurrency as u32),
        )
        .await
        {
            Ok(_) => info!("All in-flight tasks finished"),
            Err(_) => warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Shutdown grace period elapsed with tasks still running"
            ),
        }

        if let Err(e) = scheduler.await {
            error!(error = %e, "Scheduler task failed");
        }
        info!("Task server stopped");
        Ok(())
    }
}

/// 单个任务的处理结果
enum Disposition {
    Done,
    Retry(String),
    Archive(String),
}

struct Processor {
    consumer: StreamConsumer,
    conn: ConnectionManager,
    keys: QueueKeys,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    retry: RetryConfig,
}

impl Processor {
    async fn handle_message(&self, message: StreamMessage) {
        let task = match message.get_json::<TaskMessage>(TASK_FIELD) {
            Ok(Some(task)) => task,
            Ok(None) | Err(_) => {
                error!(stream = %message.stream, id = %message.id, "Malformed task message dropped");
                self.finish(&message).await;
                return;
            }
        };

        let recorded = match self.run_handler(&task).await {
            Disposition::Done => {
                debug!(task_id = %task.id, task_type = %task.task_type, "Task processed");
                record_task(&task.task_type, "success");
                Ok(())
            }
            Disposition::Retry(reason) if task.can_retry() => {
                record_task(&task.task_type, "retry");
                self.schedule_retry(task, reason).await
            }
            Disposition::Retry(reason) | Disposition::Archive(reason) => {
                record_task(&task.task_type, "archived");
                self.archive(task, reason).await
            }
        };

        // 结果未落地时不确认，消息稍后会被重新认领
        if let Err(e) = recorded {
            error!(id = %message.id, error = %e, "Failed to record task outcome");
            return;
        }
        self.finish(&message).await;
    }

    async fn run_handler(&self, task: &TaskMessage) -> Disposition {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            return Disposition::Archive(format!(
                "no handler registered for task type {}",
                task.task_type
            ));
        };
        let payload = match task.decode_payload() {
            Ok(payload) => payload,
            Err(e) => return Disposition::Archive(e.to_string()),
        };

        match AssertUnwindSafe(handler.process(&task.task_type, &payload))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Disposition::Done,
            Ok(Err(TaskError::Retry(reason))) => Disposition::Retry(reason),
            Ok(Err(TaskError::SkipRetry(reason))) => Disposition::Archive(reason),
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(task_id = %task.id, task_type = %task.task_type, %reason, "Task handler panicked");
                Disposition::Retry(reason)
            }
        }
    }

    async fn schedule_retry(&self, mut task: TaskMessage, reason: String) -> AppResult<()> {
        task.retry += 1;
        task.last_error = Some(reason);
        let delay = self.retry.jittered_delay_for_attempt(task.retry - 1);
        let due = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let json = task.to_json()?;

        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(self.keys.scheduled(), json, due)
            .await
            .map_err(|e| AppError::internal(format!("Failed to schedule retry: {}", e)))?;

        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            retry = task.retry,
            max_retry = task.max_retry,
            delay_ms = delay.as_millis() as u64,
            error = task.last_error.as_deref().unwrap_or_default(),
            "Task failed, retry scheduled"
        );
        Ok(())
    }

    async fn archive(&self, mut task: TaskMessage, reason: String) -> AppResult<()> {
        task.last_error = Some(reason);
        let json = task.to_json()?;
        let key = self.keys.archived();

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(&key, json)
            .ignore()
            .ltrim(&key, 0, ARCHIVE_MAX_LEN - 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Failed to archive task: {}", e)))?;

        error!(
            task_id = %task.id,
            task_type = %task.task_type,
            retry = task.retry,
            error = task.last_error.as_deref().unwrap_or_default(),
            "Task archived"
        );
        Ok(())
    }

    async fn finish(&self, message: &StreamMessage) {
        if let Err(e) = self
            .consumer
            .ack_and_delete(&message.stream, &message.id)
            .await
        {
            error!(stream = %message.stream, id = %message.id, error = %e, "Failed to ack task");
        }
    }
}

/// 按权重随机排列队列，每个队列恰好出现一次
pub fn queue_order<R: Rng>(weights: &[(String, u32)], rng: &mut R) -> Vec<String> {
    let mut remaining: Vec<(&str, u32)> = weights
        .iter()
        .map(|(name, weight)| (name.as_str(), (*weight).max(1)))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let total: u32 = remaining.iter().map(|(_, w)| *w).sum();
        let mut pick = rng.gen_range(0..total);
        let mut index = 0;
        for (i, (_, weight)) in remaining.iter().enumerate() {
            if pick < *weight {
                index = i;
                break;
            }
            pick -= weight;
        }
        order.push(remaining.remove(index).0.to_string());
    }

    order
}

async fn fetch_next(
    consumer: &StreamConsumer,
    keys: &QueueKeys,
    weights: &[(String, u32)],
) -> AppResult<Option<StreamMessage>> {
    let order = {
        let mut rng = rand::thread_rng();
        queue_order(weights, &mut rng)
    };

    for queue in order {
        let stream = keys.stream(&queue);
        let messages = consumer.read_group(&[stream.as_str()], 1, None).await?;
        if let Some(message) = messages.into_iter().next() {
            return Ok(Some(message));
        }
    }
    Ok(None)
}

async fn reclaim_stale(
    consumer: &StreamConsumer,
    keys: &QueueKeys,
    weights: &[(String, u32)],
    claim_idle: Duration,
) -> AppResult<Vec<StreamMessage>> {
    let min_idle_ms = claim_idle.as_millis() as u64;
    let mut reclaimed = Vec::new();

    for (queue, _) in weights {
        let stream = keys.stream(queue);
        let pending = consumer.pending(&stream, 100).await?;
        let ids: Vec<&str> = pending
            .iter()
            .filter(|p| p.idle_ms >= min_idle_ms)
            .map(|p| p.id.as_str())
            .collect();
        let claimed = consumer.claim(&stream, min_idle_ms, &ids).await?;
        if !claimed.is_empty() {
            warn!(stream = %stream, count = claimed.len(), "Reclaimed stale tasks");
        }
        reclaimed.extend(claimed);
    }

    Ok(reclaimed)
}

async fn run_scheduler(
    conn: ConnectionManager,
    keys: QueueKeys,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let script = Script::new(PROMOTE_SCRIPT);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let mut conn = conn.clone();
                let result: redis::RedisResult<usize> = script
                    .key(keys.scheduled())
                    .arg(chrono::Utc::now().timestamp_millis())
                    .arg(PROMOTE_BATCH)
                    .arg(keys.stream_prefix())
                    .arg(TASK_FIELD)
                    .invoke_async(&mut conn)
                    .await;
                match result {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "Scheduled tasks moved back to queues"),
                    Err(e) => error!(error = %e, "Failed to promote scheduled tasks"),
                }
            }
        }
    }
    debug!("Scheduler stopped");
}

/// 返回 true 表示期间收到关闭信号
async fn sleep_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn weights() -> Vec<(String, u32)> {
        vec![
            ("critical".to_string(), 6),
            ("default".to_string(), 3),
            ("low".to_string(), 1),
        ]
    }

    #[test]
    fn test_queue_order_contains_each_queue_once() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut order = queue_order(&weights(), &mut rng);
            order.sort();
            assert_eq!(order, vec!["critical", "default", "low"]);
        }
    }

    #[test]
    fn test_queue_order_favours_heavier_queues() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut first = HashMap::new();
        for _ in 0..2000 {
            let order = queue_order(&weights(), &mut rng);
            *first.entry(order[0].clone()).or_insert(0u32) += 1;
        }

        let critical = first["critical"];
        let default = first["default"];
        let low = first["low"];
        assert!(critical > default, "{critical} <= {default}");
        assert!(default > low, "{default} <= {low}");
    }

    #[test]
    fn test_zero_weight_queue_is_still_polled() {
        let mut rng = StdRng::seed_from_u64(1);
        let order = queue_order(&[("only".to_string(), 0)], &mut rng);
        assert_eq!(order, vec!["only"]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_enqueued_task_is_processed() {
        use crate::{RedisTaskQueue, StreamProducer, create_connection_manager};
        use async_trait::async_trait;
        use tokio::sync::mpsc;
        use userhub_ports::{Task, TaskQueue};

        struct Forward(mpsc::UnboundedSender<Vec<u8>>);

        #[async_trait]
        impl TaskHandler for Forward {
            async fn process(&self, _task_type: &str, payload: &[u8]) -> Result<(), TaskError> {
                self.0
                    .send(payload.to_vec())
                    .map_err(|e| TaskError::SkipRetry(e.to_string()))
            }
        }

        let conn = create_connection_manager("redis://127.0.0.1:6379").await.unwrap();
        let keys = QueueKeys::new(format!("userhub-test-{}", uuid::Uuid::new_v4()));
        let queue = RedisTaskQueue::new(StreamProducer::new(conn.clone()), keys.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut server = TaskServer::new(conn, keys, TaskServerConfig::default());
        server.handle("test:echo", Arc::new(Forward(tx)));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        queue
            .enqueue(Task::new("test:echo", b"ping".to_vec()))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"ping");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
