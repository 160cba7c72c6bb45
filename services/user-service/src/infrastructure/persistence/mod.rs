//! 持久化

mod postgres_user_repository;

pub use postgres_user_repository::*;

use sqlx::migrate::Migrator;

/// 嵌入的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
