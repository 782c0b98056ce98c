//! Table data paginator
//!
//! Builds the COUNT and bounded SELECT for one page of a table. Filter values,
//! limit and offset are always bound parameters; only quoted identifiers are
//! interpolated.

use crate::engine::dialect::Dialect;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{FilterOperator, TableDataRequest, Value};

/// Name and engine type of one table column, used to validate and coerce
/// filter columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    pub name: String,
    pub sql_type: String,
}

impl ColumnType {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Statements and parameters for one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub count_sql: String,
    /// Parameters bound to `count_sql` (the filter values)
    pub count_params: Vec<Value>,
    pub select_sql: String,
    /// Parameters bound to `select_sql` (filter values, then limit and offset)
    pub select_params: Vec<Value>,
    pub limit: u64,
    pub offset: u64,
}

/// Builds the page query for `table` (already qualified and quoted).
///
/// `columns` lists the table's columns; filter and order columns must be
/// among them. An empty list skips validation.
pub fn build_page_query(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[ColumnType],
    request: &TableDataRequest,
) -> EngineResult<PageQuery> {
    let lookup = |name: &str| -> EngineResult<Option<&ColumnType>> {
        if columns.is_empty() {
            return Ok(None);
        }
        columns
            .iter()
            .find(|c| c.name == name)
            .map(Some)
            .ok_or_else(|| EngineError::invalid_input(format!("Unknown column: {}", name)))
    };

    let mut predicates = Vec::with_capacity(request.filters.len());
    let mut params = Vec::new();

    for filter in &request.filters {
        let column = lookup(&filter.column)?;
        let ident = dialect.quote_ident(&filter.column);

        if !filter.operator.takes_value() {
            predicates.push(format!("{} {}", ident, filter.operator.as_sql()));
            continue;
        }

        let value = filter.value.clone().ok_or_else(|| {
            EngineError::invalid_input(format!(
                "Filter on {} with operator {} requires a value",
                filter.column,
                filter.operator.as_sql()
            ))
        })?;
        params.push(value);
        let index = params.len();

        let predicate = match filter.operator {
            FilterOperator::Like => {
                format!("{} LIKE {}", dialect.text_cast(&ident), dialect.placeholder(index))
            }
            FilterOperator::ILike => {
                dialect.case_insensitive_like(&ident, &dialect.placeholder(index))
            }
            op => format!(
                "{} {} {}",
                ident,
                op.as_sql(),
                dialect.typed_placeholder(index, column.map(|c| c.sql_type.as_str()))
            ),
        };
        predicates.push(predicate);
    }

    let where_clause = if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    };

    let order_clause = match request.order_by.as_deref() {
        Some(column) if !column.is_empty() => {
            lookup(column)?;
            format!(
                " ORDER BY {} {}",
                dialect.quote_ident(column),
                request.order_dir.as_sql()
            )
        }
        _ => String::new(),
    };

    let page = u64::from(request.page.max(1));
    let limit = u64::from(request.page_size.max(1));
    let offset = (page - 1) * limit;

    let count_sql = format!("SELECT COUNT(*) AS total FROM {}{}", table, where_clause);

    let limit_index = params.len() + 1;
    let offset_index = params.len() + 2;
    let select_sql = format!(
        "SELECT * FROM {}{}{} LIMIT {} OFFSET {}",
        table,
        where_clause,
        order_clause,
        dialect.placeholder(limit_index),
        dialect.placeholder(offset_index)
    );

    let count_params = params.clone();
    let mut select_params = params;
    select_params.push(Value::Int(limit as i64));
    select_params.push(Value::Int(offset as i64));

    Ok(PageQuery {
        count_sql,
        count_params,
        select_sql,
        select_params,
        limit,
        offset,
    })
}

/// `ceil(total / page_size)`; zero rows means zero pages.
pub fn total_pages(total: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    total.div_ceil(size)
}
