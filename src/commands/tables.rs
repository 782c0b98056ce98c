//! Table browsing entry points

use serde::Deserialize;
use tracing::instrument;

use crate::commands::{resolve, schema_or_default, CommandResponse};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{
    DataFilter, SortDirection, TableData, TableDataRequest, TableInfo, TableStructure,
};
use crate::AppState;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Raw table data parameters as they arrive from a request
///
/// `filters` is a JSON-encoded array of `DataFilter`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableDataParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub order_by: Option<String>,
    pub order_dir: Option<String>,
    pub filters: Option<String>,
}

impl TableDataParams {
    /// Clamps paging to `page >= 1` and `1 <= page_size <= 1000`, then parses
    /// ordering and filters.
    pub fn into_request(self) -> EngineResult<TableDataRequest> {
        let page = self.page.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
        let page_size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
            .clamp(1, MAX_PAGE_SIZE as i64) as u32;

        let order_dir = match self.order_dir.as_deref().map(str::trim) {
            None | Some("") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(EngineError::invalid_input(format!(
                    "Invalid sort direction: {}",
                    other
                )))
            }
        };

        let filters: Vec<DataFilter> = match self.filters.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| EngineError::invalid_input(format!("Invalid filters: {}", e)))?,
        };

        Ok(TableDataRequest {
            page,
            page_size,
            order_by: self.order_by.filter(|c| !c.trim().is_empty()),
            order_dir,
            filters,
        })
    }
}

#[instrument(skip(state))]
pub async fn list_tables(
    state: &AppState,
    database: &str,
    schema: Option<&str>,
) -> CommandResponse<Vec<TableInfo>> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.list_tables(schema_or_default(schema)).await
    }
    .await;
    result.into()
}

#[instrument(skip(state))]
pub async fn get_table_structure(
    state: &AppState,
    database: &str,
    schema: Option<&str>,
    table: &str,
) -> CommandResponse<TableStructure> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver
            .get_table_structure(schema_or_default(schema), table)
            .await
    }
    .await;
    result.into()
}

#[instrument(skip(state, params))]
pub async fn get_table_data(
    state: &AppState,
    database: &str,
    schema: Option<&str>,
    table: &str,
    params: TableDataParams,
) -> CommandResponse<TableData> {
    let result = async {
        let request = params.into_request()?;
        let (_, driver) = resolve(state, database).await?;
        driver
            .get_table_data(schema_or_default(schema), table, &request)
            .await
    }
    .await;
    result.into()
}
