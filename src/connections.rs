//! Dynamic connection sources
//!
//! Connections registered at runtime live outside this crate. The registry
//! reads them through `ConnectionSource` and caches the listing briefly.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{ConfigSource, DatabaseConfig};

#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Current full list of dynamically registered databases
    async fn list(&self) -> EngineResult<Vec<DatabaseConfig>>;
}

/// Source with no entries, for deployments using static slots only
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConnectionSource;

#[async_trait]
impl ConnectionSource for NoConnectionSource {
    async fn list(&self) -> EngineResult<Vec<DatabaseConfig>> {
        Ok(Vec::new())
    }
}

/// Reads a JSON array of database configurations from disk
///
/// A missing file is an empty list. The file is re-read on every call; the
/// registry's TTL bounds how often that happens.
#[derive(Debug, Clone)]
pub struct JsonFileConnectionSource {
    path: PathBuf,
}

impl JsonFileConnectionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(raw: &str) -> EngineResult<Vec<DatabaseConfig>> {
        let mut configs: Vec<DatabaseConfig> = serde_json::from_str(raw)
            .map_err(|e| EngineError::internal(format!("Invalid connections file: {}", e)))?;
        for config in &mut configs {
            config.source = ConfigSource::Dynamic;
        }
        Ok(configs)
    }
}

#[async_trait]
impl ConnectionSource for JsonFileConnectionSource {
    async fn list(&self) -> EngineResult<Vec<DatabaseConfig>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Self::parse(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(EngineError::internal(format!(
                "Failed to read {}: {}",
                self.path.display(),
                err
            ))),
        }
    }
}
