//! Driver Registry
//!
//! Resolves a configured database name to its shared driver instance.
//! Static configurations win over dynamic ones with the same name. Each
//! name owns at most one driver; concurrent first resolutions of a name wait
//! on the same construction instead of opening a second pool.
//!
//! Every driver remembers the configuration it was built from. After
//! `invalidate()` the next resolution compares it with the current one: a
//! removed name closes the driver, an edited one reopens it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, instrument, warn};

use crate::connections::ConnectionSource;
use crate::engine::drivers;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{DatabaseConfig, DriverOptions};

/// Builds a driver for one configuration
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(
        &self,
        config: &DatabaseConfig,
        options: &DriverOptions,
    ) -> EngineResult<Arc<dyn DatabaseDriver>>;
}

/// Opens real sqlx pools
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxDriverFactory;

#[async_trait]
impl DriverFactory for SqlxDriverFactory {
    async fn create(
        &self,
        config: &DatabaseConfig,
        options: &DriverOptions,
    ) -> EngineResult<Arc<dyn DatabaseDriver>> {
        drivers::connect(config, options).await
    }
}

/// A constructed driver and the configuration it was opened with
struct BuiltDriver {
    config: DatabaseConfig,
    driver: Arc<dyn DatabaseDriver>,
    /// Invalidation generation this driver was last checked against
    checked: AtomicU64,
}

type DriverCell = Arc<OnceCell<Arc<BuiltDriver>>>;

struct CachedListing {
    fetched_at: Instant,
    configs: Vec<DatabaseConfig>,
}

/// Registry that owns one driver per configured database
pub struct DriverRegistry {
    static_configs: Vec<DatabaseConfig>,
    source: Arc<dyn ConnectionSource>,
    factory: Arc<dyn DriverFactory>,
    options: DriverOptions,
    cache_ttl: Duration,
    dynamic_cache: RwLock<Option<CachedListing>>,
    instances: Mutex<HashMap<String, DriverCell>>,
    generation: AtomicU64,
}

impl DriverRegistry {
    pub fn new(
        static_configs: Vec<DatabaseConfig>,
        source: Arc<dyn ConnectionSource>,
        options: DriverOptions,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            static_configs,
            source,
            factory: Arc::new(SqlxDriverFactory),
            options,
            cache_ttl,
            dynamic_cache: RwLock::new(None),
            instances: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Replaces the factory used to build drivers
    pub fn with_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Returns the shared driver for `name`, constructing it on first use.
    ///
    /// A failed construction is not cached; the next call retries.
    #[instrument(skip(self), fields(database = %name))]
    pub async fn resolve(&self, name: &str) -> EngineResult<Arc<dyn DatabaseDriver>> {
        let cell = self.cell_for(name).await;

        if let Some(built) = cell.get() {
            if self.still_current(name, &cell, built).await? {
                return Ok(Arc::clone(&built.driver));
            }
            let fresh = self.cell_for(name).await;
            return self.build(name, &fresh).await;
        }

        self.build(name, &cell).await
    }

    async fn cell_for(&self, name: &str) -> DriverCell {
        let mut instances = self.instances.lock().await;
        Arc::clone(instances.entry(name.to_string()).or_default())
    }

    async fn build(&self, name: &str, cell: &DriverCell) -> EngineResult<Arc<dyn DatabaseDriver>> {
        let result = cell
            .get_or_try_init(|| async {
                let generation = self.generation.load(Ordering::SeqCst);
                let config = self.config_for(name).await?;
                info!(engine = %config.engine, source = ?config.source, "Opening driver");
                let driver = self.factory.create(&config, &self.options).await?;
                Ok::<_, EngineError>(Arc::new(BuiltDriver {
                    config,
                    driver,
                    checked: AtomicU64::new(generation),
                }))
            })
            .await
            .map(|built| Arc::clone(&built.driver));

        if result.is_err() {
            self.forget_uninitialized(name, cell).await;
        }
        result
    }

    /// Re-checks a built driver against the configuration after an
    /// invalidation. Returns `false` when the driver was retired and must be
    /// rebuilt.
    async fn still_current(
        &self,
        name: &str,
        cell: &DriverCell,
        built: &BuiltDriver,
    ) -> EngineResult<bool> {
        let generation = self.generation.load(Ordering::SeqCst);
        if built.checked.load(Ordering::SeqCst) == generation {
            return Ok(true);
        }

        match self.config_for(name).await {
            Ok(config) if config == built.config => {
                built.checked.store(generation, Ordering::SeqCst);
                Ok(true)
            }
            Ok(_) => {
                info!("Configuration changed; reopening driver");
                self.retire(name, cell).await;
                Ok(false)
            }
            Err(err @ EngineError::NotConfigured { .. }) => {
                info!("Configuration removed; closing driver");
                self.retire(name, cell).await;
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "Could not re-check configuration; keeping driver");
                Ok(true)
            }
        }
    }

    /// Removes `cell` from the map, if still current, and closes its driver.
    async fn retire(&self, name: &str, cell: &DriverCell) {
        let removed = {
            let mut instances = self.instances.lock().await;
            let current = instances
                .get(name)
                .map(|existing| Arc::ptr_eq(existing, cell))
                .unwrap_or(false);
            if current {
                instances.remove(name)
            } else {
                None
            }
        };
        if let Some(built) = removed.and_then(|c| c.get().cloned()) {
            built.driver.close().await;
        }
    }

    /// Drops an empty cell so unknown names do not accumulate.
    async fn forget_uninitialized(&self, name: &str, cell: &DriverCell) {
        let mut instances = self.instances.lock().await;
        let stale = instances
            .get(name)
            .map(|current| Arc::ptr_eq(current, cell) && current.get().is_none())
            .unwrap_or(false);
        if stale {
            instances.remove(name);
        }
    }

    /// Configuration for `name`: static slots first, then the dynamic source.
    pub async fn config_for(&self, name: &str) -> EngineResult<DatabaseConfig> {
        if let Some(config) = self.static_configs.iter().find(|c| c.name == name) {
            return Ok(config.clone());
        }

        self.dynamic_configs()
            .await?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::not_configured(name))
    }

    /// Merged configuration list; dynamic entries shadowed by a static name
    /// are dropped.
    pub async fn list_configs(&self) -> Vec<DatabaseConfig> {
        let mut configs = self.static_configs.clone();
        match self.dynamic_configs().await {
            Ok(dynamic) => {
                for config in dynamic {
                    if !configs.iter().any(|c| c.name == config.name) {
                        configs.push(config);
                    }
                }
            }
            Err(err) => warn!(error = %err, "Dynamic connection source unavailable"),
        }
        configs
    }

    async fn dynamic_configs(&self) -> EngineResult<Vec<DatabaseConfig>> {
        {
            let cache = self.dynamic_cache.read().await;
            if let Some(listing) = cache.as_ref() {
                if listing.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(listing.configs.clone());
                }
            }
        }

        let mut cache = self.dynamic_cache.write().await;
        if let Some(listing) = cache.as_ref() {
            if listing.fetched_at.elapsed() < self.cache_ttl {
                return Ok(listing.configs.clone());
            }
        }

        let configs = self.source.list().await?;
        *cache = Some(CachedListing {
            fetched_at: Instant::now(),
            configs: configs.clone(),
        });
        Ok(configs)
    }

    /// Forgets the cached dynamic listing so the next lookup re-reads it.
    /// Built drivers are re-checked against it on their next resolution.
    pub async fn invalidate(&self) {
        *self.dynamic_cache.write().await = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Closes and forgets the driver for `name`, if one was built.
    #[instrument(skip(self), fields(database = %name))]
    pub async fn evict(&self, name: &str) {
        let cell = self.instances.lock().await.remove(name);
        if let Some(built) = cell.and_then(|c| c.get().cloned()) {
            built.driver.close().await;
        }
    }

    /// Names with a constructed driver
    pub async fn active_names(&self) -> Vec<String> {
        let instances = self.instances.lock().await;
        let mut names: Vec<String> = instances
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Closes every pool. Later resolutions open fresh ones.
    pub async fn close_all(&self) {
        let cells: Vec<DriverCell> = {
            let mut instances = self.instances.lock().await;
            instances.drain().map(|(_, cell)| cell).collect()
        };

        let drivers: Vec<Arc<dyn DatabaseDriver>> = cells
            .iter()
            .filter_map(|cell| cell.get().map(|built| Arc::clone(&built.driver)))
            .collect();
        info!(count = drivers.len(), "Closing all drivers");
        join_all(drivers.iter().map(|driver| driver.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::NoConnectionSource;
    use crate::engine::testing::{sample_config, FakeDriver};
    use crate::engine::types::{ConfigSource, EngineKind};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DriverFactory for CountingFactory {
        async fn create(
            &self,
            config: &DatabaseConfig,
            _options: &DriverOptions,
        ) -> EngineResult<Arc<dyn DatabaseDriver>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::connection_failed("refused"));
            }
            Ok(Arc::new(FakeDriver::new(&config.name, config.engine)))
        }
    }

    struct CountingSource {
        calls: AtomicUsize,
        configs: Vec<DatabaseConfig>,
    }

    #[async_trait]
    impl ConnectionSource for CountingSource {
        async fn list(&self) -> EngineResult<Vec<DatabaseConfig>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.configs.clone())
        }
    }

    /// Source whose listing can be edited between reads
    #[derive(Default)]
    struct EditableSource {
        configs: std::sync::Mutex<Vec<DatabaseConfig>>,
    }

    impl EditableSource {
        fn set(&self, configs: Vec<DatabaseConfig>) {
            *self.configs.lock().expect("source lock") = configs;
        }
    }

    #[async_trait]
    impl ConnectionSource for EditableSource {
        async fn list(&self) -> EngineResult<Vec<DatabaseConfig>> {
            Ok(self.configs.lock().expect("source lock").clone())
        }
    }

    fn dynamic(name: &str, host: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            source: ConfigSource::Dynamic,
            ..sample_config(name, EngineKind::Mysql)
        }
    }

    fn registry(
        static_configs: Vec<DatabaseConfig>,
        source: Arc<dyn ConnectionSource>,
        factory: Arc<CountingFactory>,
        ttl: Duration,
    ) -> DriverRegistry {
        DriverRegistry::new(static_configs, source, DriverOptions::default(), ttl)
            .with_factory(factory)
    }

    #[tokio::test]
    async fn concurrent_resolution_builds_one_driver() {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(
            vec![sample_config("main", EngineKind::Postgres)],
            Arc::new(NoConnectionSource),
            Arc::clone(&factory),
            Duration::from_secs(10),
        );

        let (a, b) = tokio::join!(registry.resolve("main"), registry.resolve("main"));
        let a = a.expect("first resolve");
        let b = b.expect("second resolve");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        let c = registry.resolve("main").await.expect("cached resolve");
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.active_names().await, vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn unknown_name_is_not_configured() {
        let registry = registry(
            Vec::new(),
            Arc::new(NoConnectionSource),
            Arc::new(CountingFactory::default()),
            Duration::from_secs(10),
        );

        let err = match registry.resolve("ghost").await {
            Ok(_) => panic!("ghost should not resolve"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::NotConfigured { ref name } if name == "ghost"));
        assert!(registry.active_names().await.is_empty());
    }

    #[tokio::test]
    async fn failed_construction_is_retried() {
        let factory = Arc::new(CountingFactory {
            fail: true,
            ..CountingFactory::default()
        });
        let registry = registry(
            vec![sample_config("main", EngineKind::Postgres)],
            Arc::new(NoConnectionSource),
            Arc::clone(&factory),
            Duration::from_secs(10),
        );

        assert!(registry.resolve("main").await.is_err());
        assert!(registry.resolve("main").await.is_err());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn static_configs_win_over_dynamic_ones() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            configs: vec![dynamic("main", "dynamic.host"), dynamic("extra", "extra.host")],
        });
        let registry = registry(
            vec![sample_config("main", EngineKind::Postgres)],
            source,
            Arc::new(CountingFactory::default()),
            Duration::from_secs(10),
        );

        let config = registry.config_for("main").await.expect("main is configured");
        assert_eq!(config.source, ConfigSource::Static);

        let listed = registry.list_configs().await;
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "extra"]);
    }

    #[tokio::test]
    async fn dynamic_listing_is_cached_until_invalidated() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            configs: vec![dynamic("extra", "extra.host")],
        });
        let registry = registry(
            Vec::new(),
            Arc::clone(&source) as Arc<dyn ConnectionSource>,
            Arc::new(CountingFactory::default()),
            Duration::from_secs(60),
        );

        registry.config_for("extra").await.expect("configured");
        registry.config_for("extra").await.expect("configured");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        registry.invalidate().await;
        registry.config_for("extra").await.expect("configured");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_rereads() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            configs: Vec::new(),
        });
        let registry = registry(
            Vec::new(),
            Arc::clone(&source) as Arc<dyn ConnectionSource>,
            Arc::new(CountingFactory::default()),
            Duration::ZERO,
        );

        registry.list_configs().await;
        registry.list_configs().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_all_closes_every_driver() {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(
            vec![
                sample_config("a", EngineKind::Postgres),
                sample_config("b", EngineKind::Mysql),
            ],
            Arc::new(NoConnectionSource),
            Arc::clone(&factory),
            Duration::from_secs(10),
        );

        let a = registry.resolve("a").await.expect("a");
        let b = registry.resolve("b").await.expect("b");
        registry.close_all().await;

        assert!(a.ping().await.is_err());
        assert!(b.ping().await.is_err());
        assert!(registry.active_names().await.is_empty());

        let reopened = registry.resolve("a").await.expect("reopened");
        assert!(!Arc::ptr_eq(&a, &reopened));
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn removed_connection_stops_resolving_after_invalidate() {
        let source = Arc::new(EditableSource::default());
        source.set(vec![dynamic("extra", "extra.host")]);
        let registry = registry(
            Vec::new(),
            Arc::clone(&source) as Arc<dyn ConnectionSource>,
            Arc::new(CountingFactory::default()),
            Duration::from_secs(60),
        );

        let driver = registry.resolve("extra").await.expect("extra resolves");
        source.set(Vec::new());

        // Cached listing still holds the entry
        assert!(registry.resolve("extra").await.is_ok());

        registry.invalidate().await;
        let err = match registry.resolve("extra").await {
            Ok(_) => panic!("removed connection should not resolve"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::NotConfigured { .. }));
        assert!(driver.ping().await.is_err());
        assert!(registry.active_names().await.is_empty());
    }

    #[tokio::test]
    async fn edited_connection_reopens_after_invalidate() {
        let source = Arc::new(EditableSource::default());
        source.set(vec![dynamic("extra", "old.host")]);
        let factory = Arc::new(CountingFactory::default());
        let registry = registry(
            Vec::new(),
            Arc::clone(&source) as Arc<dyn ConnectionSource>,
            Arc::clone(&factory),
            Duration::from_secs(60),
        );

        let old = registry.resolve("extra").await.expect("extra resolves");

        registry.invalidate().await;
        let same = registry.resolve("extra").await.expect("unchanged config");
        assert!(Arc::ptr_eq(&old, &same));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        source.set(vec![dynamic("extra", "new.host")]);
        registry.invalidate().await;
        let new = registry.resolve("extra").await.expect("edited config");

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.ping().await.is_err());
        assert!(new.ping().await.is_ok());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }
}
