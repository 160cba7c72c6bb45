//! 基础设施实现

pub mod persistence;
pub mod telegram;

pub use persistence::*;
pub use telegram::*;
