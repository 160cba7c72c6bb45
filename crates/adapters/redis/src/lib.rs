//! userhub-adapter-redis - Redis 适配器
//!
//! 响应缓存，以及基于 Redis Stream 的任务队列（入队端和 worker 端）。

mod cache;
mod connection;
mod stream;
mod task_queue;
mod task_server;

pub use cache::*;
pub use connection::*;
pub use stream::*;
pub use task_queue::*;
pub use task_server::*;
