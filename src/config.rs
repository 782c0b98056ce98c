//! Runtime configuration.
//!
//! Settings are read from a per-user config file; environment variables
//! override any stored values so managed deployments can pin them. Static
//! database configurations come from numbered `DB{n}_*` environment slots.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::engine::types::{ConfigSource, DatabaseConfig, DriverOptions, EngineKind};

/// Highest numbered `DB{n}_*` slot that is read.
pub const MAX_STATIC_SLOTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long a dynamic connection listing stays fresh
    pub cache_ttl_secs: u64,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// Maximum pooled connections per database
    pub pool_size: u32,
    /// Rows dumped per table before the table is marked truncated
    pub dump_row_limit: usize,
    /// JSON file listing dynamic connections
    pub connections_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 10,
            connect_timeout_secs: 5,
            query_timeout_secs: 8,
            pool_size: 5,
            dump_row_limit: 50_000,
            connections_file: None,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_bool_opt<F>(lookup: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|value| parse_bool(&value))
}

fn env_parse_opt<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `~/.dbdeck` (or `%APPDATA%\dbdeck` on Windows)
pub fn config_dir() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var_os("APPDATA")
            .unwrap_or_else(|| std::env::var_os("USERPROFILE").unwrap_or_default());
        let mut path = PathBuf::from(appdata);
        path.push("dbdeck");
        path
    } else {
        let home = std::env::var_os("HOME").unwrap_or_default();
        let mut path = PathBuf::from(home);
        path.push(".dbdeck");
        path
    }
}

fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn load_from_file(path: &Path) -> Option<Settings> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Ignoring malformed settings file");
            None
        }
    }
}

impl Settings {
    fn apply_env_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_parse_opt(lookup, "DBDECK_CACHE_TTL_SECS") {
            self.cache_ttl_secs = value;
        }
        if let Some(value) = env_parse_opt(lookup, "DBDECK_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = value;
        }
        if let Some(value) = env_parse_opt(lookup, "DBDECK_QUERY_TIMEOUT_SECS") {
            self.query_timeout_secs = value;
        }
        if let Some(value) = env_parse_opt(lookup, "DBDECK_POOL_SIZE") {
            self.pool_size = value;
        }
        if let Some(value) = env_parse_opt(lookup, "DBDECK_DUMP_ROW_LIMIT") {
            self.dump_row_limit = value;
        }
        if let Some(value) = lookup("DBDECK_CONNECTIONS_FILE") {
            self.connections_file = Some(PathBuf::from(value));
        }
    }

    /// Loads `~/.dbdeck/config.json` and applies environment overrides.
    pub fn load() -> Self {
        Self::load_with(&config_path(), process_env)
    }

    pub fn load_with<F>(path: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = load_from_file(path).unwrap_or_default();
        settings.apply_env_overrides(&lookup);
        settings
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            max_connections: self.pool_size.max(1),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            query_timeout: Duration::from_secs(self.query_timeout_secs.max(1)),
        }
    }
}

/// Reads static database configurations from the process environment.
pub fn static_configs_from_env() -> Vec<DatabaseConfig> {
    parse_static_configs(process_env)
}

/// Reads `DB{n}_*` slots through `lookup`.
///
/// A slot is used when `DB{n}_HOST` is set. Duplicate names keep the lowest
/// slot; slots with an unknown engine are skipped.
pub fn parse_static_configs<F>(lookup: F) -> Vec<DatabaseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut seen = HashSet::new();
    let mut configs = Vec::new();

    for slot in 1..=MAX_STATIC_SLOTS {
        let key = |field: &str| format!("DB{}_{}", slot, field);
        let Some(host) = lookup(&key("HOST")) else {
            continue;
        };

        let engine = match lookup(&key("TYPE")) {
            None => EngineKind::Postgres,
            Some(raw) => match EngineKind::parse(&raw) {
                Some(engine) => engine,
                None => {
                    warn!(slot, engine = %raw, "Skipping database slot with unknown engine");
                    continue;
                }
            },
        };

        let name = lookup(&key("NAME")).unwrap_or_else(|| format!("db{}", slot));
        if !seen.insert(name.clone()) {
            warn!(slot, name = %name, "Skipping duplicate database name");
            continue;
        }

        let port = env_parse_opt(&lookup, &key("PORT")).unwrap_or_else(|| engine.default_port());
        let user = lookup(&key("USER")).unwrap_or_default();
        let database = lookup(&key("DATABASE")).unwrap_or_else(|| user.clone());

        configs.push(DatabaseConfig {
            name,
            host,
            port,
            user,
            password: lookup(&key("PASSWORD")).unwrap_or_default(),
            database,
            engine,
            source: ConfigSource::Static,
            ssl: env_bool_opt(&lookup, &key("SSL")).unwrap_or(false),
            read_only: env_bool_opt(&lookup, &key("READ_ONLY")).unwrap_or(false),
        });
    }

    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn slots_without_host_are_ignored() {
        let configs = parse_static_configs(env(&[
            ("DB1_HOST", "pg.local"),
            ("DB1_USER", "app"),
            ("DB2_NAME", "orphan"),
            ("DB3_HOST", "mysql.local"),
            ("DB3_TYPE", "mariadb"),
            ("DB3_NAME", "legacy"),
            ("DB3_READ_ONLY", "yes"),
        ]));

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "db1");
        assert_eq!(configs[0].port, 5432);
        assert_eq!(configs[0].database, "app");
        assert_eq!(configs[1].name, "legacy");
        assert_eq!(configs[1].engine, EngineKind::Mariadb);
        assert_eq!(configs[1].port, 3306);
        assert!(configs[1].read_only);
        assert!(configs.iter().all(|c| c.source == ConfigSource::Static));
    }

    #[test]
    fn unknown_engines_and_duplicates_are_skipped() {
        let configs = parse_static_configs(env(&[
            ("DB1_HOST", "a"),
            ("DB1_NAME", "main"),
            ("DB2_HOST", "b"),
            ("DB2_NAME", "main"),
            ("DB4_HOST", "c"),
            ("DB4_TYPE", "oracle"),
            ("DB20_HOST", "d"),
            ("DB20_TYPE", "supabase"),
            ("DB21_HOST", "e"),
        ]));

        let names: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "db20"]);
        assert_eq!(configs[0].host, "a");
    }

    #[test]
    fn env_overrides_settings_file_values() {
        let settings = Settings::load_with(
            Path::new("/nonexistent/dbdeck/config.json"),
            env(&[
                ("DBDECK_CACHE_TTL_SECS", "60"),
                ("DBDECK_DUMP_ROW_LIMIT", "not-a-number"),
                ("DBDECK_CONNECTIONS_FILE", "/etc/dbdeck/connections.json"),
            ]),
        );

        assert_eq!(settings.cache_ttl(), Duration::from_secs(60));
        assert_eq!(settings.dump_row_limit, 50_000);
        assert_eq!(
            settings.connections_file,
            Some(PathBuf::from("/etc/dbdeck/connections.json"))
        );
    }

    #[test]
    fn partial_settings_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"pool_size": 12}"#).expect("should parse");
        assert_eq!(settings.pool_size, 12);
        assert_eq!(settings.query_timeout_secs, 8);
        assert_eq!(
            settings.driver_options().query_timeout,
            Duration::from_secs(8)
        );
    }

    #[test]
    fn default_settings_match_default_driver_options() {
        let options = Settings::default().driver_options();
        assert_eq!(options, DriverOptions::default());
        assert!(options.query_timeout < Duration::from_secs(10));
        assert!(options.connect_timeout < Duration::from_secs(10));
    }
}
