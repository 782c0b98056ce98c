//! In-memory driver used by unit tests across the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::dialect::{Dialect, MySqlDialect, PostgresDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::humanize::format_bytes;
use crate::engine::paginator::total_pages;
use crate::engine::traits::{DatabaseDriver, StatementStream};
use crate::engine::types::{
    ColumnInfo, ConfigSource, ConnectionInfo, ConstraintInfo, ConstraintKind, DatabaseConfig,
    DatabaseStats, EngineKind, FieldInfo, ImportReport, IndexInfo, QueryResult, Row, RowData,
    RowKey, TableData, TableDataRequest, TableInfo, TableStructure, Value,
};

pub fn sample_config(name: &str, engine: EngineKind) -> DatabaseConfig {
    DatabaseConfig {
        name: name.to_string(),
        host: "localhost".to_string(),
        port: engine.default_port(),
        user: "app".to_string(),
        password: "secret".to_string(),
        database: "app".to_string(),
        engine,
        source: ConfigSource::Static,
        ssl: false,
        read_only: false,
    }
}

pub fn column(name: &str, data_type: &str, engine_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
        engine_type: engine_type.to_string(),
        nullable: true,
        default_value: None,
        max_length: None,
        numeric_precision: None,
        numeric_scale: None,
        is_primary_key: false,
        is_auto_increment: false,
    }
}

pub fn primary_key(name: &str, columns: &[&str]) -> ConstraintInfo {
    ConstraintInfo {
        name: name.to_string(),
        kind: ConstraintKind::PrimaryKey,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        references: None,
        definition: None,
    }
}

pub fn index(name: &str, columns: &[&str], is_unique: bool) -> IndexInfo {
    IndexInfo {
        name: name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        is_unique,
        is_primary: false,
        method: Some("btree".to_string()),
        definition: None,
    }
}

struct FakeTable {
    schema: String,
    name: String,
    structure: TableStructure,
    rows: Vec<Row>,
}

/// Records every statement it receives and serves tables from memory.
pub struct FakeDriver {
    name: String,
    engine: EngineKind,
    tables: Mutex<Vec<FakeTable>>,
    executed: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeDriver {
    pub fn new(name: &str, engine: EngineKind) -> Self {
        Self {
            name: name.to_string(),
            engine,
            tables: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_table(
        self,
        schema: &str,
        name: &str,
        structure: TableStructure,
        rows: Vec<Row>,
    ) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.push(FakeTable {
                schema: schema.to_string(),
                name: name.to_string(),
                structure,
                rows,
            });
        }
        self
    }

    /// Statements containing `fragment` fail with an execution error.
    pub fn failing_on(self, fragment: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(fragment.to_string());
        }
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn rows_of(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| {
                tables
                    .iter()
                    .find(|t| t.name == table)
                    .map(|t| t.rows.clone())
            })
            .unwrap_or_default()
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::connection_failed("pool closed"));
        }
        Ok(())
    }

    fn record(&self, sql: &str) -> EngineResult<()> {
        self.check_open()?;
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }
        let fails = self
            .failing
            .lock()
            .map(|f| f.iter().any(|fragment| sql.contains(fragment.as_str())))
            .unwrap_or(false);
        if fails {
            return Err(EngineError::execution_error(format!(
                "statement rejected: {}",
                sql
            )));
        }
        Ok(())
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut FakeTable) -> T,
    ) -> EngineResult<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| EngineError::internal("fake tables poisoned"))?;
        tables
            .iter_mut()
            .find(|t| t.name == table)
            .map(f)
            .ok_or_else(|| EngineError::execution_error(format!("relation {} does not exist", table)))
    }

    fn fields(structure: &TableStructure) -> Vec<FieldInfo> {
        structure
            .columns
            .iter()
            .map(|c| FieldInfo {
                name: c.name.clone(),
                type_name: c.engine_type.to_uppercase(),
            })
            .collect()
    }

    fn row_from(data: &RowData) -> Row {
        data.columns
            .iter()
            .fold(Row::new(), |row, (k, v)| row.with(k.clone(), v.clone()))
    }
}

#[async_trait]
impl DatabaseDriver for FakeDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn dialect(&self) -> &dyn Dialect {
        match self.engine {
            EngineKind::Postgres | EngineKind::Supabase => &PostgresDialect,
            EngineKind::Mysql | EngineKind::Mariadb => &MySqlDialect,
        }
    }

    async fn ping(&self) -> EngineResult<()> {
        self.check_open()
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> EngineResult<QueryResult> {
        self.record(sql)?;
        let tables = self
            .tables
            .lock()
            .map_err(|_| EngineError::internal("fake tables poisoned"))?;
        let dialect = self.dialect();
        let source = tables
            .iter()
            .find(|t| sql.contains(&format!("FROM {}", dialect.qualify(&t.schema, &t.name))));
        match source {
            Some(table) if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") => {
                Ok(QueryResult {
                    rows: table.rows.clone(),
                    fields: Self::fields(&table.structure),
                    affected_rows: None,
                    execution_time_ms: 0.1,
                })
            }
            _ => Ok(QueryResult::with_affected_rows(0, 0.1)),
        }
    }

    async fn execute_script(
        &self,
        statements: &mut StatementStream<'_>,
    ) -> EngineResult<ImportReport> {
        self.check_open()?;
        let mut report = ImportReport::default();
        for (offset, statement) in statements.enumerate() {
            match self.record(&statement) {
                Ok(()) => report.record_success(),
                Err(err) => report.record_failure(offset + 1, &statement, err.to_string()),
            }
        }
        Ok(report)
    }

    async fn list_databases(&self) -> EngineResult<Vec<String>> {
        self.check_open()?;
        Ok(vec!["app".to_string()])
    }

    async fn list_schemas(&self) -> EngineResult<Vec<String>> {
        self.check_open()?;
        let tables = self
            .tables
            .lock()
            .map_err(|_| EngineError::internal("fake tables poisoned"))?;
        let mut schemas: Vec<String> = tables.iter().map(|t| t.schema.clone()).collect();
        schemas.dedup();
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> EngineResult<Vec<TableInfo>> {
        self.check_open()?;
        let tables = self
            .tables
            .lock()
            .map_err(|_| EngineError::internal("fake tables poisoned"))?;
        let ignores_schema = matches!(self.engine, EngineKind::Mysql | EngineKind::Mariadb);
        Ok(tables
            .iter()
            .filter(|t| ignores_schema || t.schema == schema)
            .map(|t| TableInfo {
                schema: t.schema.clone(),
                name: t.name.clone(),
                size_bytes: 8192,
                size: format_bytes(8192),
                row_estimate: t.rows.len() as i64,
            })
            .collect())
    }

    async fn get_table_structure(&self, _schema: &str, table: &str) -> EngineResult<TableStructure> {
        self.check_open()?;
        self.with_table_mut(table, |t| t.structure.clone())
    }

    async fn get_table_data(
        &self,
        _schema: &str,
        table: &str,
        request: &TableDataRequest,
    ) -> EngineResult<TableData> {
        self.check_open()?;
        self.with_table_mut(table, |t| {
            let total = t.rows.len() as u64;
            let offset = (request.page.saturating_sub(1) as usize) * request.page_size as usize;
            let rows = t
                .rows
                .iter()
                .skip(offset)
                .take(request.page_size as usize)
                .cloned()
                .collect();
            TableData {
                rows,
                fields: Self::fields(&t.structure),
                total,
                page: request.page,
                page_size: request.page_size,
                total_pages: total_pages(total, request.page_size),
            }
        })
    }

    async fn get_database_stats(&self) -> EngineResult<DatabaseStats> {
        self.check_open()?;
        Ok(DatabaseStats {
            version: "fake 1.0".to_string(),
            current_db: "app".to_string(),
            db_size: format_bytes(8192),
            db_size_bytes: 8192,
            active_connections: 1,
            max_connections: 100,
            uptime: "1m".to_string(),
        })
    }

    async fn get_active_connections(&self) -> EngineResult<Vec<ConnectionInfo>> {
        self.check_open()?;
        Ok(Vec::new())
    }

    async fn get_slow_queries(&self) -> EngineResult<Vec<Row>> {
        self.check_open()?;
        Ok(Vec::new())
    }

    async fn primary_key_columns(&self, _schema: &str, table: &str) -> EngineResult<Vec<String>> {
        self.check_open()?;
        self.with_table_mut(table, |t| {
            t.structure
                .primary_key()
                .map(|pk| pk.columns.clone())
                .unwrap_or_default()
        })
    }

    async fn insert_row(
        &self,
        _schema: &str,
        table: &str,
        _primary_key: Option<&str>,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        self.record(&format!("INSERT INTO {}", table))?;
        let row = Self::row_from(data);
        self.with_table_mut(table, |t| {
            t.rows.push(row.clone());
            Some(row)
        })
    }

    async fn update_row(
        &self,
        _schema: &str,
        table: &str,
        key: &RowKey,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        self.record(&format!("UPDATE {}", table))?;
        self.with_table_mut(table, |t| {
            let existing = t
                .rows
                .iter_mut()
                .find(|r| r.get(&key.column) == Some(&key.value))?;
            let mut updated = Row::new();
            for (name, value) in existing.iter() {
                let value = data.columns.get(name).unwrap_or(value).clone();
                updated.push(name, value);
            }
            *existing = updated.clone();
            Some(updated)
        })
    }

    async fn delete_row(&self, _schema: &str, table: &str, key: &RowKey) -> EngineResult<Option<Row>> {
        self.record(&format!("DELETE FROM {}", table))?;
        self.with_table_mut(table, |t| {
            let position = t
                .rows
                .iter()
                .position(|r| r.get(&key.column) == Some(&key.value))?;
            Some(t.rows.remove(position))
        })
    }

    async fn create_database(&self, name: &str, _owner: Option<&str>) -> EngineResult<()> {
        self.record(&format!("CREATE DATABASE {}", self.dialect().quote_ident(name)))
    }

    async fn drop_database(&self, name: &str) -> EngineResult<()> {
        self.record(&format!("DROP DATABASE {}", self.dialect().quote_ident(name)))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
