//! 分页参数
//!
//! 页码从 1 开始。非法或越界的输入会被静默修正为默认值或上限，不会报错。

use serde::{Deserialize, Serialize};

/// 默认页码
pub const DEFAULT_PAGE: i64 = 1;
/// 默认每页条数
pub const DEFAULT_LIMIT: i64 = 10;
/// 每页条数上限
pub const MAX_LIMIT: i64 = 100;

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

impl PaginationParams {
    /// 按规则修正后构造
    pub fn new(page: i64, limit: i64) -> Self {
        let page = if page < 1 { DEFAULT_PAGE } else { page };
        let limit = if limit < 1 {
            DEFAULT_LIMIT
        } else {
            limit.min(MAX_LIMIT)
        };

        Self {
            page,
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }

    /// 从查询字符串原始值解析，无法解析的值使用默认值
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(
            parse_int_param(page, DEFAULT_PAGE),
            parse_int_param(limit, DEFAULT_LIMIT),
        )
    }
}

fn parse_int_param(value: Option<&str>, default_value: i64) -> i64 {
    match value {
        Some(v) if !v.is_empty() => v.trim().parse().unwrap_or(default_value),
        _ => default_value,
    }
}

/// 分页响应元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total_rows: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    /// 计算分页元数据，total_pages 为向上取整
    pub fn calculate(page: i64, limit: i64, total_rows: i64) -> Self {
        let page = page.max(1);
        let limit = if limit < 1 { DEFAULT_LIMIT } else { limit };
        let total_rows = total_rows.max(0);

        let mut total_pages = total_rows / limit;
        if total_rows % limit > 0 {
            total_pages += 1;
        }

        Self {
            page,
            limit,
            total_rows,
            total_pages,
        }
    }
}
