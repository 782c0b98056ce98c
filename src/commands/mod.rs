//! Request-shaped entry points
//!
//! Each function resolves the named database through the registry, calls
//! the driver and wraps the outcome in a `CommandResponse`. Mutating entry
//! points refuse read-only databases and report to the activity sink.

pub mod backup;
pub mod database;
pub mod mutation;
pub mod query;
pub mod tables;

use std::sync::Arc;

use serde::Serialize;

use crate::engine::error::{EngineError, EngineResult, ErrorKind};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::DatabaseConfig;
use crate::AppState;

/// Schema used when a request names none (ignored on MySQL)
pub const DEFAULT_SCHEMA: &str = "public";

/// Response wrapper for every entry point
#[derive(Debug, Serialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl<T> CommandResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(err: &EngineError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

impl<T> From<EngineResult<T>> for CommandResponse<T> {
    fn from(result: EngineResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(&err),
        }
    }
}

pub(crate) fn schema_or_default(schema: Option<&str>) -> &str {
    schema
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCHEMA)
}

pub(crate) async fn resolve(
    state: &AppState,
    database: &str,
) -> EngineResult<(DatabaseConfig, Arc<dyn DatabaseDriver>)> {
    let config = state.registry.config_for(database).await?;
    let driver = state.registry.resolve(database).await?;
    Ok((config, driver))
}

/// Like `resolve`, but fails with `ReadOnly` for read-only databases.
pub(crate) async fn resolve_writable(
    state: &AppState,
    database: &str,
) -> EngineResult<Arc<dyn DatabaseDriver>> {
    let (config, driver) = resolve(state, database).await?;
    if config.read_only {
        return Err(EngineError::read_only(&config.name));
    }
    Ok(driver)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::activity::{ActivitySink, MemoryActivitySink};
    use crate::config::Settings;
    use crate::connections::NoConnectionSource;
    use crate::engine::error::EngineResult;
    use crate::engine::registry::{DriverFactory, DriverRegistry};
    use crate::engine::testing::FakeDriver;
    use crate::engine::traits::DatabaseDriver;
    use crate::engine::types::{DatabaseConfig, DriverOptions};
    use crate::AppState;

    /// Hands out the same fake for every configuration.
    struct SharedFactory(Arc<FakeDriver>);

    #[async_trait]
    impl DriverFactory for SharedFactory {
        async fn create(
            &self,
            _config: &DatabaseConfig,
            _options: &DriverOptions,
        ) -> EngineResult<Arc<dyn DatabaseDriver>> {
            Ok(Arc::clone(&self.0) as Arc<dyn DatabaseDriver>)
        }
    }

    pub fn state_with(
        configs: Vec<DatabaseConfig>,
        driver: Arc<FakeDriver>,
    ) -> (AppState, Arc<MemoryActivitySink>) {
        let registry = DriverRegistry::new(
            configs,
            Arc::new(NoConnectionSource),
            DriverOptions::default(),
            Duration::from_secs(10),
        )
        .with_factory(Arc::new(SharedFactory(driver)));
        let sink = Arc::new(MemoryActivitySink::new());
        let state = AppState::new(registry, Settings::default(), Arc::clone(&sink) as Arc<dyn ActivitySink>);
        (state, sink)
    }
}
