//! 列表排序参数
//!
//! 格式：`sort=field:direction,field2`，方向可省略，默认 `asc`。
//! 字段必须在白名单（用户键 -> 存储列）中，非法字段或方向会被拒绝而不是忽略。

use std::fmt;

use thiserror::Error;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// 单个排序项，`column` 已映射为存储列名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParams {
    pub column: String,
    pub direction: SortDirection,
}

impl SortParams {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }
}

impl fmt::Display for SortParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.direction.as_sql())
    }
}

/// 非法排序参数
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SortValidationError {
    pub invalid_fields: Vec<String>,
    pub invalid_directions: Vec<String>,
}

impl fmt::Display for SortValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.invalid_fields.is_empty() {
            parts.push(format!("invalid sort field: {}", self.invalid_fields.join(",")));
        }
        if !self.invalid_directions.is_empty() {
            parts.push(format!(
                "invalid sort direction: {}",
                self.invalid_directions.join(",")
            ));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// 解析排序参数
///
/// - `sort`：原始 `sort` 查询值
/// - `allowed`：用户键 -> 存储列
/// - `defaults`：未提供排序（或全部为重复项）时使用
pub fn parse_sorts(
    sort: Option<&str>,
    allowed: &[(&str, &str)],
    defaults: &[SortParams],
) -> Result<Vec<SortParams>, SortValidationError> {
    let sort = match sort {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(defaults.to_vec()),
    };

    let mut sorts = Vec::new();
    let mut invalid_fields = Vec::new();
    let mut invalid_directions = Vec::new();
    let mut used: Vec<&str> = Vec::new();

    for part in sort.split(',') {
        let (key, direction) = match part.split_once(':') {
            Some((key, dir)) => (key, Some(dir)),
            None => (part, None),
        };

        let Some((_, column)) = allowed.iter().find(|(k, _)| *k == key) else {
            invalid_fields.push(key.to_string());
            continue;
        };

        // 同一字段只取第一次出现
        if used.contains(&key) {
            continue;
        }
        used.push(key);

        let direction = match direction {
            None => SortDirection::Asc,
            Some(dir) => match SortDirection::parse(dir) {
                Some(d) => d,
                None => {
                    invalid_directions.push(dir.to_lowercase());
                    continue;
                }
            },
        };

        sorts.push(SortParams::new(*column, direction));
    }

    if !invalid_fields.is_empty() || !invalid_directions.is_empty() {
        return Err(SortValidationError {
            invalid_fields,
            invalid_directions,
        });
    }

    if sorts.is_empty() {
        return Ok(defaults.to_vec());
    }

    Ok(sorts)
}

/// 生成 ORDER BY 子句，列名只来自白名单
pub fn to_order_by(sorts: &[SortParams]) -> String {
    if sorts.is_empty() {
        return String::new();
    }
    let items: Vec<String> = sorts.iter().map(ToString::to_string).collect();
    format!("ORDER BY {}", items.join(", "))
}
