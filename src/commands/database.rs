//! Database-level entry points: configuration listing, connection tests,
//! server statistics and database lifecycle.

use std::time::Instant;

use serde::Serialize;
use tracing::instrument;

use crate::activity::ActivityEntry;
use crate::commands::{resolve, resolve_writable, CommandResponse};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{ConnectionInfo, DatabaseConfig, DatabaseStats, EngineKind, Row};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub database: String,
    pub engine: EngineKind,
    pub latency_ms: f64,
}

/// Every configured database, static entries first. Passwords are never
/// serialized.
pub async fn list_configs(state: &AppState) -> CommandResponse<Vec<DatabaseConfig>> {
    CommandResponse::ok(state.registry.list_configs().await)
}

/// Re-reads the dynamic connection listing on the next lookup.
pub async fn refresh_configs(state: &AppState) -> CommandResponse<Vec<DatabaseConfig>> {
    state.registry.invalidate().await;
    list_configs(state).await
}

#[instrument(skip(state))]
pub async fn test_connection(state: &AppState, database: &str) -> CommandResponse<ConnectionTest> {
    let result: EngineResult<ConnectionTest> = async {
        let (config, driver) = resolve(state, database).await?;
        let start = Instant::now();
        driver.ping().await?;
        Ok(ConnectionTest {
            database: config.name,
            engine: config.engine,
            latency_ms: start.elapsed().as_micros() as f64 / 1000.0,
        })
    }
    .await;
    result.into()
}

/// Databases on the server behind `database`
#[instrument(skip(state))]
pub async fn list_databases(state: &AppState, database: &str) -> CommandResponse<Vec<String>> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.list_databases().await
    }
    .await;
    result.into()
}

#[instrument(skip(state))]
pub async fn list_schemas(state: &AppState, database: &str) -> CommandResponse<Vec<String>> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.list_schemas().await
    }
    .await;
    result.into()
}

#[instrument(skip(state))]
pub async fn get_database_stats(state: &AppState, database: &str) -> CommandResponse<DatabaseStats> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.get_database_stats().await
    }
    .await;
    result.into()
}

#[instrument(skip(state))]
pub async fn get_active_connections(
    state: &AppState,
    database: &str,
) -> CommandResponse<Vec<ConnectionInfo>> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.get_active_connections().await
    }
    .await;
    result.into()
}

#[instrument(skip(state))]
pub async fn get_slow_queries(state: &AppState, database: &str) -> CommandResponse<Vec<Row>> {
    let result = async {
        let (_, driver) = resolve(state, database).await?;
        driver.get_slow_queries().await
    }
    .await;
    result.into()
}

fn validate_database_name(name: &str) -> EngineResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_input("Database name is required"));
    }
    Ok(trimmed)
}

/// Creates a database on the server behind `database`.
#[instrument(skip(state))]
pub async fn create_database(
    state: &AppState,
    user: &str,
    database: &str,
    name: &str,
    owner: Option<&str>,
) -> CommandResponse<()> {
    let result = async {
        let name = validate_database_name(name)?;
        let driver = resolve_writable(state, database).await?;
        driver
            .create_database(name, owner.filter(|o| !o.trim().is_empty()))
            .await
    }
    .await;

    let entry = ActivityEntry::new(user, database, "create_database", format!("Create database {}", name));
    state.activity.log_activity(match &result {
        Ok(()) => entry,
        Err(err) => ActivityEntry {
            details: format!("{}: {}", entry.details, err),
            ..entry
        }
        .failed(),
    });
    result.into()
}

/// Drops a database on the server behind `database`.
#[instrument(skip(state))]
pub async fn drop_database(
    state: &AppState,
    user: &str,
    database: &str,
    name: &str,
) -> CommandResponse<()> {
    let result = async {
        let name = validate_database_name(name)?;
        let driver = resolve_writable(state, database).await?;
        driver.drop_database(name).await
    }
    .await;

    let entry = ActivityEntry::new(user, database, "drop_database", format!("Drop database {}", name));
    state.activity.log_activity(match &result {
        Ok(()) => entry,
        Err(err) => ActivityEntry {
            details: format!("{}: {}", entry.details, err),
            ..entry
        }
        .failed(),
    });
    result.into()
}
