//! userhub-bootstrap - 统一启动骨架
//!
//! api 与 worker 两个进程复用的启动逻辑

mod health;
mod infrastructure;
mod runtime;
mod shutdown;

pub use health::*;
pub use infrastructure::*;
pub use runtime::*;
pub use shutdown::*;
