//! 数据库迁移

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;
use userhub_errors::{AppError, AppResult};

/// 执行嵌入的迁移，已执行过的版本会被跳过
pub async fn run_migrations(pool: &PgPool, migrator: &Migrator) -> AppResult<()> {
    migrator
        .run(pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to run migrations: {}", e)))?;

    let latest = migrator.iter().map(|m| m.version).max();
    info!(latest_version = ?latest, "Database migrations applied");
    Ok(())
}
