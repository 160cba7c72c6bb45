//! 列表过滤参数
//!
//! 查询参数必须出现在白名单中（`page`、`limit` 以及调用方额外放行的键总是允许），
//! 否则整个请求被拒绝。白名单内的空值会被忽略。

use std::collections::BTreeMap;

use thiserror::Error;

/// 总是允许的分页参数
const ALWAYS_ALLOWED: &[&str] = &["page", "limit"];

/// 非法查询参数
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid query parameters: {}", .invalid_params.join(", "))]
pub struct FilterValidationError {
    pub invalid_params: Vec<String>,
}

/// 过滤条件：字段名 -> 值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterParams(BTreeMap<String, String>);

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// 解析过滤参数
///
/// - `query`：原始查询参数（保持请求中的顺序）
/// - `allowed`：可作为过滤条件的字段
/// - `extra_allowed`：允许出现但不作为过滤条件的参数（如 `sort`）
pub fn parse_filters(
    query: &[(String, String)],
    allowed: &[&str],
    extra_allowed: &[&str],
) -> Result<FilterParams, FilterValidationError> {
    let mut invalid_params: Vec<String> = Vec::new();

    for (key, _) in query {
        let known = allowed.contains(&key.as_str())
            || extra_allowed.contains(&key.as_str())
            || ALWAYS_ALLOWED.contains(&key.as_str());
        if !known && !invalid_params.contains(key) {
            invalid_params.push(key.clone());
        }
    }

    if !invalid_params.is_empty() {
        return Err(FilterValidationError { invalid_params });
    }

    let mut filters = FilterParams::new();
    for field in allowed {
        // 同名参数出现多次时取第一个
        if let Some((_, value)) = query.iter().find(|(k, _)| k == field) {
            if !value.is_empty() {
                filters.insert(*field, value.clone());
            }
        }
    }

    Ok(filters)
}
