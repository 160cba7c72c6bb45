//! 列表查询构造
//!
//! 过滤值一律作为绑定参数；列名只来自调用方白名单，不来自请求。

use sqlx::{Postgres, QueryBuilder};
use userhub_common::{FilterParams, PaginationParams, SortParams, to_order_by};

/// 追加 `WHERE col ILIKE '%value%' AND ...`
///
/// `columns` 为过滤键 -> 列名，未出现在其中的过滤键被忽略。
pub fn push_ilike_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    filters: &FilterParams,
    columns: &[(&str, &str)],
) {
    let mut first = true;
    for (key, column) in columns {
        let Some(value) = filters.get(key) else {
            continue;
        };
        builder.push(if first { " WHERE " } else { " AND " });
        first = false;
        builder.push(*column);
        builder.push(" ILIKE ");
        builder.push_bind(format!("%{}%", value));
    }
}

/// 追加 ORDER BY 子句
pub fn push_order_by(builder: &mut QueryBuilder<'_, Postgres>, sorts: &[SortParams]) {
    let clause = to_order_by(sorts);
    if !clause.is_empty() {
        builder.push(" ");
        builder.push(clause);
    }
}

/// 追加 LIMIT/OFFSET
pub fn push_pagination(builder: &mut QueryBuilder<'_, Postgres>, pagination: &PaginationParams) {
    builder.push(" LIMIT ");
    builder.push_bind(pagination.limit);
    builder.push(" OFFSET ");
    builder.push_bind(pagination.offset);
}
