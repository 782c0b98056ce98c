// dbdeck - multi-engine database access layer
// Core library

pub mod activity;
pub mod backup;
pub mod commands;
pub mod config;
pub mod connections;
pub mod engine;
pub mod observability;

use std::sync::Arc;

use tracing::info;

use activity::{ActivitySink, TracingActivitySink};
use config::Settings;
use connections::{ConnectionSource, JsonFileConnectionSource, NoConnectionSource};
use engine::DriverRegistry;

/// Everything an entry point needs, owned by the host and passed by
/// reference.
pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub settings: Settings,
    pub activity: Arc<dyn ActivitySink>,
}

impl AppState {
    pub fn new(registry: DriverRegistry, settings: Settings, activity: Arc<dyn ActivitySink>) -> Self {
        Self {
            registry: Arc::new(registry),
            settings,
            activity,
        }
    }

    /// Loads settings and static `DB{n}_*` slots from the environment and
    /// wires the default connection source and activity sink.
    pub fn init() -> Self {
        let settings = Settings::load();
        let static_configs = config::static_configs_from_env();
        let source: Arc<dyn ConnectionSource> = match &settings.connections_file {
            Some(path) => Arc::new(JsonFileConnectionSource::new(path.clone())),
            None => Arc::new(NoConnectionSource),
        };

        info!(
            static_databases = static_configs.len(),
            dynamic_source = settings.connections_file.is_some(),
            "Initializing dbdeck"
        );

        let registry = DriverRegistry::new(
            static_configs,
            source,
            settings.driver_options(),
            settings.cache_ttl(),
        );
        Self::new(registry, settings, Arc::new(TracingActivitySink))
    }

    /// Closes every open pool.
    pub async fn close_all(&self) {
        self.registry.close_all().await;
    }
}
