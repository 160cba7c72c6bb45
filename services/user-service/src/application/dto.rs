//! 请求/响应 DTO

use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use userhub_errors::{AppError, AppResult};

use crate::domain::User;

const NAME_MIN: usize = 3;
const NAME_MAX: usize = 100;
const PASSWORD_MIN: usize = 6;

/// 创建用户请求
#[derive(Clone, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &"***")
            .finish()
    }
}

impl CreateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.email.is_empty() {
            return Err(AppError::validation("email is required"));
        }
        validate_email(&self.email)?;
        if self.name.is_empty() {
            return Err(AppError::validation("name is required"));
        }
        validate_name(&self.name)?;
        if self.password.is_empty() {
            return Err(AppError::validation("password is required"));
        }
        if self.password.chars().count() < PASSWORD_MIN {
            return Err(AppError::validation(format!(
                "password must be at least {} characters",
                PASSWORD_MIN
            )));
        }
        Ok(())
    }
}

/// 更新用户请求，缺省或为空的字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(email) = self.email() {
            validate_email(email)?;
        }
        if let Some(name) = self.name() {
            validate_name(name)?;
        }
        Ok(())
    }

    /// 非空的新邮箱
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|s| !s.is_empty())
    }

    /// 非空的新名字
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|s| !s.is_empty())
    }
}

fn validate_email(email: &str) -> AppResult<()> {
    if EmailAddress::is_valid(email) {
        Ok(())
    } else {
        Err(AppError::validation(format!("invalid email: {}", email)))
    }
}

fn validate_name(name: &str) -> AppResult<()> {
    let len = name.chars().count();
    if (NAME_MIN..=NAME_MAX).contains(&len) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "name must be between {} and {} characters",
            NAME_MIN, NAME_MAX
        )))
    }
}

/// 对外的用户数据，不含密码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self::from(&user)
    }
}

/// 用户列表一页
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<UserResponse>,
    pub total: i64,
}
