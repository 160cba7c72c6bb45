//! ports - 抽象 trait 层
//!
//! 定义所有基础设施的抽象接口

mod cache;
mod event_publisher;
mod task_queue;
mod unit_of_work;

pub use cache::*;
pub use event_publisher::*;
pub use task_queue::*;
pub use unit_of_work::*;
