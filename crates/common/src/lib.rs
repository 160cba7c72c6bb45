//! userhub-common - 通用类型和工具库
//!
//! 列表查询参数（分页、过滤、排序）与重试退避。

pub mod filter;
pub mod pagination;
pub mod retry;
pub mod sort;

pub use filter::*;
pub use pagination::*;
pub use retry::*;
pub use sort::*;
