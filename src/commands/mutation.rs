//! Row mutation entry points
//!
//! Rows are addressed by their table's primary key. Tables without one, or
//! whose key spans several columns, are reported as not editable before
//! anything is sent to the engine.

use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;

use crate::activity::ActivityEntry;
use crate::commands::{resolve_writable, schema_or_default, CommandResponse};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{Row, RowData, RowKey, Value};
use crate::AppState;

async fn editable_driver(
    state: &AppState,
    database: &str,
    schema: &str,
    table: &str,
) -> EngineResult<(Arc<dyn DatabaseDriver>, String)> {
    let driver = resolve_writable(state, database).await?;
    let mut columns = driver.primary_key_columns(schema, table).await?;
    match columns.len() {
        0 => Err(EngineError::not_editable(table)),
        1 => Ok((driver, columns.remove(0))),
        _ => Err(EngineError::composite_key(table, &columns)),
    }
}

fn log_outcome(
    state: &AppState,
    user: &str,
    database: &str,
    operation: &str,
    details: String,
    started: Instant,
    result: &EngineResult<Option<Row>>,
) {
    let elapsed = started.elapsed().as_micros() as f64 / 1000.0;
    let entry = match result {
        Ok(_) => ActivityEntry::new(user, database, operation, details),
        Err(err) => ActivityEntry::new(user, database, operation, format!("{}: {}", details, err))
            .failed(),
    };
    state.activity.log_activity(entry.with_duration(elapsed));
}

/// Inserts a row and returns it as stored.
#[instrument(skip(state, data), fields(database = %database, table = %table))]
pub async fn insert_row(
    state: &AppState,
    user: &str,
    database: &str,
    schema: Option<&str>,
    table: &str,
    data: RowData,
) -> CommandResponse<Option<Row>> {
    let schema = schema_or_default(schema);
    let started = Instant::now();
    let result = async {
        let (driver, primary_key) = editable_driver(state, database, schema, table).await?;
        driver
            .insert_row(schema, table, Some(primary_key.as_str()), &data)
            .await
    }
    .await;

    log_outcome(
        state,
        user,
        database,
        "insert_row",
        format!("Insert into {}.{}", schema, table),
        started,
        &result,
    );
    result.into()
}

/// Updates the row whose primary key equals `key_value`.
#[instrument(skip(state, key_value, data), fields(database = %database, table = %table))]
pub async fn update_row(
    state: &AppState,
    user: &str,
    database: &str,
    schema: Option<&str>,
    table: &str,
    key_value: Value,
    data: RowData,
) -> CommandResponse<Option<Row>> {
    let schema = schema_or_default(schema);
    let started = Instant::now();
    let display_key = key_value.to_display();
    let result = async {
        let (driver, primary_key) = editable_driver(state, database, schema, table).await?;
        let key = RowKey::new(primary_key, key_value);
        driver.update_row(schema, table, &key, &data).await
    }
    .await;

    log_outcome(
        state,
        user,
        database,
        "update_row",
        format!("Update {}.{} row {}", schema, table, display_key),
        started,
        &result,
    );
    result.into()
}

/// Deletes the row whose primary key equals `key_value`.
#[instrument(skip(state, key_value), fields(database = %database, table = %table))]
pub async fn delete_row(
    state: &AppState,
    user: &str,
    database: &str,
    schema: Option<&str>,
    table: &str,
    key_value: Value,
) -> CommandResponse<Option<Row>> {
    let schema = schema_or_default(schema);
    let started = Instant::now();
    let display_key = key_value.to_display();
    let result = async {
        let (driver, primary_key) = editable_driver(state, database, schema, table).await?;
        let key = RowKey::new(primary_key, key_value);
        driver.delete_row(schema, table, &key).await
    }
    .await;

    log_outcome(
        state,
        user,
        database,
        "delete_row",
        format!("Delete from {}.{} row {}", schema, table, display_key),
        started,
        &result,
    );
    result.into()
}
