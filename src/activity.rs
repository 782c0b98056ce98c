//! Activity logging
//!
//! Entry points report what they did to an `ActivitySink`. Storage belongs to
//! the host application; the default sink only emits a tracing event.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user: String,
    pub database: String,
    /// Short operation label, e.g. `query`, `insert_row`, `import`
    pub operation: String,
    pub details: String,
    pub sql: Option<String>,
    pub success: bool,
    pub duration_ms: Option<f64>,
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        user: impl Into<String>,
        database: impl Into<String>,
        operation: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            database: database.into(),
            operation: operation.into(),
            details: details.into(),
            sql: None,
            success: true,
            duration_ms: None,
            at: Utc::now(),
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Receiver for activity entries. Implementations must not fail the caller.
pub trait ActivitySink: Send + Sync {
    fn log_activity(&self, entry: ActivityEntry);
}

/// Writes each entry as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn log_activity(&self, entry: ActivityEntry) {
        if entry.success {
            info!(
                target: "dbdeck::activity",
                id = %entry.id,
                user = %entry.user,
                database = %entry.database,
                operation = %entry.operation,
                duration_ms = ?entry.duration_ms,
                sql = ?entry.sql,
                "{}",
                entry.details
            );
        } else {
            warn!(
                target: "dbdeck::activity",
                id = %entry.id,
                user = %entry.user,
                database = %entry.database,
                operation = %entry.operation,
                duration_ms = ?entry.duration_ms,
                sql = ?entry.sql,
                "{}",
                entry.details
            );
        }
    }
}

/// Keeps entries in memory; used by hosts that render a recent-activity view.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl MemoryActivitySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ActivitySink for MemoryActivitySink {
    fn log_activity(&self, entry: ActivityEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
