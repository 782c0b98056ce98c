//! Dump and import entry points

use std::time::Instant;

use tracing::instrument;

use crate::activity::ActivityEntry;
use crate::backup::{self, DumpGenerator, DumpOutput};
use crate::commands::{resolve, resolve_writable, schema_or_default, CommandResponse};
use crate::engine::types::ImportReport;
use crate::AppState;

/// Generates a SQL dump of one schema, optionally limited to some tables.
#[instrument(skip(state, tables))]
pub async fn dump_database(
    state: &AppState,
    user: &str,
    database: &str,
    schema: Option<&str>,
    tables: Option<Vec<String>>,
) -> CommandResponse<DumpOutput> {
    let schema = schema_or_default(schema);
    let started = Instant::now();
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        let mut generator = DumpGenerator::new(driver.as_ref(), schema)
            .with_row_limit(state.settings.dump_row_limit);
        if let Some(tables) = tables {
            generator = generator.with_tables(tables);
        }
        generator.generate().await
    }
    .await;

    let elapsed = started.elapsed().as_micros() as f64 / 1000.0;
    let entry = match &result {
        Ok(dump) => ActivityEntry::new(
            user,
            database,
            "dump",
            format!(
                "Dumped {} table(s), {} row(s) to {}",
                dump.tables, dump.rows, dump.file_name
            ),
        ),
        Err(err) => ActivityEntry::new(user, database, "dump", format!("Dump failed: {}", err)).failed(),
    };
    state.activity.log_activity(entry.with_duration(elapsed));
    result.into()
}

/// Imports an uploaded `.sql` file. Partial failures still succeed; the
/// report lists the failing statements.
#[instrument(skip(state, sql), fields(bytes = sql.len()))]
pub async fn import_sql(
    state: &AppState,
    user: &str,
    database: &str,
    file_name: &str,
    sql: &str,
) -> CommandResponse<ImportReport> {
    let started = Instant::now();
    let result = async {
        backup::validate_file_name(file_name)?;
        let driver = resolve_writable(state, database).await?;
        backup::import_sql(driver.as_ref(), file_name, sql).await
    }
    .await;

    let elapsed = started.elapsed().as_micros() as f64 / 1000.0;
    let entry = match &result {
        Ok(report) => {
            let entry = ActivityEntry::new(
                user,
                database,
                "import",
                format!(
                    "Imported {}: {} executed, {} failed",
                    file_name, report.statements_executed, report.statements_failed
                ),
            );
            if report.has_errors() {
                entry.failed()
            } else {
                entry
            }
        }
        Err(err) => {
            ActivityEntry::new(user, database, "import", format!("Import of {} failed: {}", file_name, err))
                .failed()
        }
    };
    state.activity.log_activity(entry.with_duration(elapsed));
    result.into()
}
