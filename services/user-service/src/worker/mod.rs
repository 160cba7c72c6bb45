//! 后台处理器：任务队列与事件订阅

mod telegram_handler;
mod user_created;

pub use telegram_handler::*;
pub use user_created::*;
