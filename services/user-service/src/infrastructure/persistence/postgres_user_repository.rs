//! PostgreSQL 用户 Repository 实现
//!
//! 每条语句都通过 [`get_executor`] 取执行器：活动事务中用事务连接，否则从连接池取。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use userhub_adapter_postgres::{
    PgScope, PgTx, get_executor, map_write_error, push_ilike_filters, push_order_by,
    push_pagination,
};
use userhub_common::{FilterParams, PaginationParams, SortParams};
use userhub_errors::{AppError, AppResult};
use userhub_telemetry::mask_sensitive;

use crate::domain::{
    EMAIL_EXISTS, FILTER_COLUMNS, NewUser, USER_NOT_FOUND, User, UserRepository,
};

const USER_COLUMNS: &str = "id, email, name, password, created_at, updated_at";

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository<PgTx> for PostgresUserRepository {
    async fn create(&self, scope: &PgScope, user: NewUser) -> AppResult<User> {
        debug!(
            params = ?mask_sensitive([
                ("email", user.email.as_str()),
                ("name", user.name.as_str()),
                ("password", user.password_hash.as_str()),
            ]),
            in_transaction = scope.is_active(),
            "Inserting user"
        );

        let mut executor = get_executor(&self.pool, scope).await?;
        let (id, created_at, updated_at): (i64, DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO users (email, name, password, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_one(executor.as_conn()?)
        .await
        .map_err(|e| map_write_error(e, EMAIL_EXISTS, "Failed to create user"))?;

        Ok(User {
            id,
            email: user.email,
            name: user.name,
            password: user.password_hash,
            created_at,
            updated_at,
        })
    }

    async fn get_by_id(&self, scope: &PgScope, id: i64) -> AppResult<User> {
        let mut executor = get_executor(&self.pool, scope).await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(executor.as_conn()?)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {}", e)))?;

        row.map(UserRow::into_user)
            .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
    }

    async fn get_by_email(&self, scope: &PgScope, email: &str) -> AppResult<User> {
        let mut executor = get_executor(&self.pool, scope).await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(executor.as_conn()?)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {}", e)))?;

        row.map(UserRow::into_user)
            .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
    }

    async fn list(
        &self,
        scope: &PgScope,
        pagination: &PaginationParams,
        filters: &FilterParams,
        sorts: &[SortParams],
    ) -> AppResult<Vec<User>> {
        let mut builder = list_query(pagination, filters, sorts);
        debug!(sql = builder.sql(), "Listing users");

        let mut executor = get_executor(&self.pool, scope).await?;
        let rows = builder
            .build_query_as::<UserRow>()
            .fetch_all(executor.as_conn()?)
            .await
            .map_err(|e| AppError::database(format!("Failed to list users: {}", e)))?;

        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }

    async fn update(&self, scope: &PgScope, user: &User) -> AppResult<DateTime<Utc>> {
        let mut executor = get_executor(&self.pool, scope).await?;
        let updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE users SET email = $1, name = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING updated_at
            "#,
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.id)
        .fetch_optional(executor.as_conn()?)
        .await
        .map_err(|e| map_write_error(e, EMAIL_EXISTS, "Failed to update user"))?;

        updated_at.ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
    }

    async fn delete(&self, scope: &PgScope, id: i64) -> AppResult<()> {
        let mut executor = get_executor(&self.pool, scope).await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(executor.as_conn()?)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete user: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(USER_NOT_FOUND));
        }
        Ok(())
    }

    async fn count(&self, scope: &PgScope, filters: &FilterParams) -> AppResult<i64> {
        let mut builder = count_query(filters);

        let mut executor = get_executor(&self.pool, scope).await?;
        builder
            .build_query_scalar::<i64>()
            .fetch_one(executor.as_conn()?)
            .await
            .map_err(|e| AppError::database(format!("Failed to count users: {}", e)))
    }
}

fn list_query<'a>(
    pagination: &PaginationParams,
    filters: &'a FilterParams,
    sorts: &[SortParams],
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_ilike_filters(&mut builder, filters, FILTER_COLUMNS);
    push_order_by(&mut builder, sorts);
    push_pagination(&mut builder, pagination);
    builder
}

fn count_query(filters: &FilterParams) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_ilike_filters(&mut builder, filters, FILTER_COLUMNS);
    builder
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    name: String,
    password: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            password: self.password,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
