//! 领域层：用户实体、密码哈希与仓储接口

mod password;
mod repository;
mod user;

pub use password::*;
pub use repository::*;
pub use user::*;
