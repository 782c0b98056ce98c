//! SQL file import
//!
//! Splits an uploaded SQL text into statements and runs them best-effort on
//! one connection of the target database.

use std::path::Path;

use tracing::{info, instrument};

use crate::backup::splitter::SqlSplitter;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::ImportReport;

/// Accepts only `.sql` files, in any letter case.
pub fn validate_file_name(file_name: &str) -> EngineResult<()> {
    let is_sql = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("sql"))
        .unwrap_or(false);
    if is_sql {
        Ok(())
    } else {
        Err(EngineError::invalid_input(format!(
            "Only .sql files can be imported, got {}",
            file_name
        )))
    }
}

/// Runs every statement of `sql` against `driver`.
///
/// Statement failures land in the report; only a rejected file name or a
/// connection failure is an error.
#[instrument(skip(driver, sql), fields(database = %driver.name(), bytes = sql.len()))]
pub async fn import_sql(
    driver: &dyn DatabaseDriver,
    file_name: &str,
    sql: &str,
) -> EngineResult<ImportReport> {
    validate_file_name(file_name)?;

    let mut statements =
        SqlSplitter::new(sql).with_backslash_escapes(driver.dialect().backslash_escapes());
    let report = driver.execute_script(&mut statements).await?;

    info!(
        executed = report.statements_executed,
        failed = report.statements_failed,
        "Import finished"
    );
    Ok(report)
}

/// Reads a SQL file from disk and imports it.
pub async fn import_file(driver: &dyn DatabaseDriver, path: &Path) -> EngineResult<ImportReport> {
    let file_name = path.to_string_lossy();
    validate_file_name(&file_name)?;
    let sql = tokio::fs::read_to_string(path).await.map_err(|e| {
        EngineError::invalid_input(format!("Failed to read {}: {}", path.display(), e))
    })?;
    import_sql(driver, &file_name, &sql).await
}
