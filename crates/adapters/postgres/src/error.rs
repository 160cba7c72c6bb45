//! sqlx 错误映射

use tracing::warn;
use userhub_errors::AppError;

/// unique_violation
pub const UNIQUE_VIOLATION: &str = "23505";

/// 是否为唯一约束冲突
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code.as_ref() == UNIQUE_VIOLATION)
}

/// 写操作错误映射：唯一约束冲突为 Conflict，其余为 Database
pub fn map_write_error(err: sqlx::Error, conflict_message: &str, context: &str) -> AppError {
    if is_unique_violation(&err) {
        return AppError::conflict(conflict_message);
    }
    AppError::database(format!("{}: {}", context, err))
}

/// 判断 sqlx 错误是否可重试
pub fn is_sqlx_retryable(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) => true,
        sqlx::Error::Tls(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            // 40001: serialization_failure
            // 40P01: deadlock_detected
            // 57P01/57P02/57P03: 服务端关闭或尚未就绪
            // 08000/08003/08006: 连接异常
            match db_err.code() {
                Some(code) => matches!(
                    code.as_ref(),
                    "40001" | "40P01" | "57P01" | "57P02" | "57P03" | "08000" | "08003" | "08006"
                ),
                None => false,
            }
        }
        other => {
            warn!(error = %other, "Unclassified sqlx error treated as non-retryable");
            false
        }
    }
}
