//! Concrete engine drivers

pub mod mysql;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{DatabaseConfig, DriverOptions, EngineKind};

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;

/// Opens a pool for `config` with the driver matching its engine.
pub async fn connect(
    config: &DatabaseConfig,
    options: &DriverOptions,
) -> EngineResult<Arc<dyn DatabaseDriver>> {
    let driver: Arc<dyn DatabaseDriver> = match config.engine {
        EngineKind::Postgres | EngineKind::Supabase => {
            Arc::new(PostgresDriver::connect(config, options).await?)
        }
        EngineKind::Mysql | EngineKind::Mariadb => {
            Arc::new(MySqlDriver::connect(config, options).await?)
        }
    };
    Ok(driver)
}

/// Bounds a sqlx future by `limit`, classifying both failure kinds.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(EngineError::from_query),
        Err(_) => Err(EngineError::Timeout {
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}
