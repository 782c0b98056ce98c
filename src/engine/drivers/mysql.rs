//! MySQL Driver
//!
//! Implements the DatabaseDriver trait for MySQL and MariaDB using SQLx.
//!
//! ## Read-back without RETURNING
//!
//! Inserts run on one reserved connection so `LAST_INSERT_ID()` belongs to
//! this insert and not a concurrent one; the row is then re-selected on that
//! same connection. Updates re-select after the write, deletes select first.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row as SqlxRow, TypeInfo};
use tracing::{debug, info, warn};

use super::{elapsed_ms, with_timeout};
use crate::engine::dialect::{Dialect, MySqlDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::humanize::{format_bytes, format_uptime};
use crate::engine::paginator::{build_page_query, total_pages, ColumnType};
use crate::engine::sql_safety::returns_rows;
use crate::engine::traits::{DatabaseDriver, StatementStream};
use crate::engine::types::{
    ColumnInfo, ConnectionInfo, ConstraintInfo, ConstraintKind, DatabaseConfig, DatabaseStats,
    DriverOptions, EngineKind, FieldInfo, ForeignKeyTarget, ImportReport, IndexInfo, QueryResult,
    Row, RowData, RowKey, TableData, TableDataRequest, TableInfo, TableStructure, Value,
};

type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

/// `information_schema` constraint type words and their normalized kinds
const CONSTRAINT_TYPES: [(&str, ConstraintKind); 4] = [
    ("PRIMARY KEY", ConstraintKind::PrimaryKey),
    ("FOREIGN KEY", ConstraintKind::ForeignKey),
    ("UNIQUE", ConstraintKind::Unique),
    ("CHECK", ConstraintKind::Check),
];

fn normalize_constraint_type(word: &str) -> Option<ConstraintKind> {
    let word = word.trim();
    CONSTRAINT_TYPES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(word))
        .map(|(_, kind)| *kind)
}

/// Splits a `GROUP_CONCAT` column list.
fn split_list(list: Option<String>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

const LIST_DATABASES_SQL: &str = r#"
    SELECT CAST(SCHEMA_NAME AS CHAR)
    FROM information_schema.SCHEMATA
    ORDER BY SCHEMA_NAME
"#;

const LIST_TABLES_SQL: &str = r#"
    SELECT CAST(TABLE_SCHEMA AS CHAR),
           CAST(TABLE_NAME AS CHAR),
           CAST(COALESCE(DATA_LENGTH, 0) + COALESCE(INDEX_LENGTH, 0) AS SIGNED),
           CAST(COALESCE(TABLE_ROWS, 0) AS SIGNED)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const COLUMNS_SQL: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR),
           CAST(DATA_TYPE AS CHAR),
           CAST(COLUMN_TYPE AS CHAR),
           CAST(IS_NULLABLE AS CHAR),
           CAST(COLUMN_DEFAULT AS CHAR),
           CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED),
           CAST(NUMERIC_PRECISION AS SIGNED),
           CAST(NUMERIC_SCALE AS SIGNED),
           CAST(COLUMN_KEY AS CHAR),
           CAST(EXTRA AS CHAR)
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const COLUMN_TYPES_SQL: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR)
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT CAST(tc.CONSTRAINT_NAME AS CHAR),
           CAST(tc.CONSTRAINT_TYPE AS CHAR),
           CAST(GROUP_CONCAT(k.COLUMN_NAME ORDER BY k.ORDINAL_POSITION SEPARATOR ',') AS CHAR),
           CAST(MAX(k.REFERENCED_TABLE_SCHEMA) AS CHAR),
           CAST(MAX(k.REFERENCED_TABLE_NAME) AS CHAR),
           CAST(GROUP_CONCAT(k.REFERENCED_COLUMN_NAME ORDER BY k.ORDINAL_POSITION SEPARATOR ',') AS CHAR)
    FROM information_schema.TABLE_CONSTRAINTS tc
    LEFT JOIN information_schema.KEY_COLUMN_USAGE k
      ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
     AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
     AND k.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.TABLE_SCHEMA = DATABASE() AND tc.TABLE_NAME = ?
    GROUP BY tc.CONSTRAINT_NAME, tc.CONSTRAINT_TYPE
    ORDER BY tc.CONSTRAINT_TYPE, tc.CONSTRAINT_NAME
"#;

const CHECK_CLAUSES_SQL: &str = r#"
    SELECT CAST(CONSTRAINT_NAME AS CHAR), CAST(CHECK_CLAUSE AS CHAR)
    FROM information_schema.CHECK_CONSTRAINTS
    WHERE CONSTRAINT_SCHEMA = DATABASE()
"#;

const INDEXES_SQL: &str = r#"
    SELECT CAST(INDEX_NAME AS CHAR),
           CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX SEPARATOR ',') AS CHAR),
           CAST(MIN(NON_UNIQUE) AS SIGNED),
           CAST(MAX(INDEX_TYPE) AS CHAR)
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    GROUP BY INDEX_NAME
    ORDER BY INDEX_NAME
"#;

const PRIMARY_KEY_SQL: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR)
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION
"#;

const STATS_SQL: &str = r#"
    SELECT CAST(VERSION() AS CHAR),
           CAST(DATABASE() AS CHAR),
           CAST((SELECT COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0)
                 FROM information_schema.TABLES
                 WHERE TABLE_SCHEMA = DATABASE()) AS SIGNED),
           CAST(@@max_connections AS SIGNED)
"#;

const STATUS_SQL: &str =
    "SHOW GLOBAL STATUS WHERE Variable_name IN ('Threads_connected', 'Uptime')";

const ACTIVE_CONNECTIONS_SQL: &str = r#"
    SELECT CAST(ID AS SIGNED),
           CAST(USER AS CHAR),
           CAST(DB AS CHAR),
           CAST(HOST AS CHAR),
           CAST(COMMAND AS CHAR),
           CAST(INFO AS CHAR),
           CAST(TIME AS SIGNED)
    FROM information_schema.PROCESSLIST
    WHERE ID <> CONNECTION_ID()
    ORDER BY TIME DESC
"#;

const SLOW_QUERIES_SQL: &str = r#"
    SELECT start_time,
           CAST(user_host AS CHAR) AS user_host,
           query_time,
           rows_sent,
           rows_examined,
           CAST(sql_text AS CHAR) AS sql_text
    FROM mysql.slow_log
    ORDER BY query_time DESC
    LIMIT 20
"#;

/// MySQL/MariaDB driver bound to one configured database
pub struct MySqlDriver {
    name: String,
    engine: EngineKind,
    pool: MySqlPool,
    query_timeout: Duration,
    dialect: MySqlDialect,
}

impl MySqlDriver {
    pub async fn connect(config: &DatabaseConfig, options: &DriverOptions) -> EngineResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect_with(Self::connect_options(config))
            .await
            .map_err(EngineError::from_connect)?;

        info!(
            database = %config.name,
            host = %config.host,
            engine = %config.engine,
            "Opened MySQL pool"
        );

        Ok(Self {
            name: config.name.clone(),
            engine: config.engine,
            pool,
            query_timeout: options.query_timeout,
            dialect: MySqlDialect,
        })
    }

    fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
        let ssl_mode = if config.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        };

        MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(ssl_mode)
            .charset("utf8mb4")
    }

    /// Helper to bind a Value to a MySQL query
    fn bind_param<'q>(query: MySqlQuery<'q>, value: &'q Value) -> MySqlQuery<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Json(j) => query.bind(j),
            // No array type; stored as JSON text
            Value::Array(items) => {
                query.bind(serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()))
            }
            Value::Decimal(d) => query.bind(d),
            Value::Timestamp(ts) => query.bind(ts),
            Value::TimestampTz(ts) => query.bind(ts),
            Value::Date(d) => query.bind(d),
            Value::Time(t) => query.bind(t),
            Value::Bytes(b) => query.bind(b),
        }
    }

    fn build_query<'q>(
        sql: &'q str,
        params: impl IntoIterator<Item = &'q Value>,
    ) -> MySqlQuery<'q> {
        params
            .into_iter()
            .fold(sqlx::query(sql), |query, value| Self::bind_param(query, value))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(mysql_row: &MySqlRow) -> Row {
        let mut row = Row::new();
        for col in mysql_row.columns() {
            row.push(col.name(), Self::extract_value(mysql_row, col.ordinal()));
        }
        row
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v
                .map(|u| match i64::try_from(u) {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::Decimal(Decimal::from(u)),
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(Value::Decimal).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(Value::TimestampTz).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v.map(Value::Timestamp).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v.map(Value::Date).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v.map(Value::Time).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    /// Gets field info from a MySqlRow
    fn field_info(row: &MySqlRow) -> Vec<FieldInfo> {
        row.columns()
            .iter()
            .map(|col| FieldInfo {
                name: col.name().to_string(),
                type_name: col.type_info().name().to_string(),
            })
            .collect()
    }

    async fn describe_fields(&self, sql: &str) -> Vec<FieldInfo> {
        match with_timeout(self.query_timeout, (&self.pool).describe(sql)).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|col| FieldInfo {
                    name: col.name().to_string(),
                    type_name: col.type_info().name().to_string(),
                })
                .collect(),
            Err(err) => {
                debug!(error = %err, "Could not describe statement");
                Vec::new()
            }
        }
    }

    async fn fetch<'q>(
        &self,
        sql: &'q str,
        params: impl IntoIterator<Item = &'q Value>,
    ) -> EngineResult<Vec<MySqlRow>> {
        let query = Self::build_query(sql, params);
        with_timeout(self.query_timeout, query.fetch_all(&self.pool)).await
    }

    async fn fetch_optional_row<'q>(
        &self,
        sql: &'q str,
        params: impl IntoIterator<Item = &'q Value>,
    ) -> EngineResult<Option<Row>> {
        let query = Self::build_query(sql, params);
        let row = with_timeout(self.query_timeout, query.fetch_optional(&self.pool)).await?;
        Ok(row.as_ref().map(Self::convert_row))
    }

    async fn run_raw(&self, sql: &str) -> EngineResult<u64> {
        let result = with_timeout(self.query_timeout, self.pool.execute(sqlx::raw_sql(sql))).await?;
        Ok(result.rows_affected())
    }

    async fn column_types(&self, table: &str) -> EngineResult<Vec<ColumnType>> {
        let rows: Vec<(String, String)> = with_timeout(
            self.query_timeout,
            sqlx::query_as(COLUMN_TYPES_SQL).bind(table).fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, sql_type)| ColumnType::new(name, sql_type))
            .collect())
    }

    /// CHECK clauses by constraint name; empty on servers without the view.
    async fn check_clauses(&self) -> HashMap<String, String> {
        let rows: EngineResult<Vec<(String, Option<String>)>> = with_timeout(
            self.query_timeout,
            sqlx::query_as(CHECK_CLAUSES_SQL).fetch_all(&self.pool),
        )
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|(name, clause)| clause.map(|c| (name, c)))
                .collect(),
            Err(err) => {
                debug!(database = %self.name, error = %err, "CHECK_CONSTRAINTS unavailable");
                HashMap::new()
            }
        }
    }

    /// `Threads_connected` and `Uptime` from the server status counters
    async fn status_counters(&self) -> (i64, i64) {
        let rows = match self.fetch(STATUS_SQL, std::iter::empty()).await {
            Ok(rows) => rows,
            Err(err) => {
                debug!(database = %self.name, error = %err, "Global status unavailable");
                return (0, 0);
            }
        };

        let mut threads = 0;
        let mut uptime = 0;
        for row in &rows {
            let name = Self::extract_value(row, 0).to_display();
            let value = Self::extract_value(row, 1).to_display().parse().unwrap_or(0);
            if name.eq_ignore_ascii_case("Threads_connected") {
                threads = value;
            } else if name.eq_ignore_ascii_case("Uptime") {
                uptime = value;
            }
        }
        (threads, uptime)
    }
}

fn insert_sql(dialect: &MySqlDialect, qualified: &str, data: &RowData) -> String {
    let columns: Vec<String> = data.columns.keys().map(|k| dialect.quote_ident(k)).collect();
    let placeholders = vec!["?"; data.columns.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn update_sql(dialect: &MySqlDialect, qualified: &str, key: &RowKey, data: &RowData) -> String {
    let assignments: Vec<String> = data
        .columns
        .keys()
        .map(|k| format!("{} = ?", dialect.quote_ident(k)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        qualified,
        assignments.join(", "),
        dialect.quote_ident(&key.column)
    )
}

/// Key value that finds an inserted row again: the supplied key value, else
/// the id the server generated for this session's insert.
fn read_back_key(data: &RowData, primary_key: &str, inserted_id: u64) -> Option<Value> {
    match data.columns.get(primary_key) {
        Some(value) if !value.is_null() => Some(value.clone()),
        _ if inserted_id > 0 => Some(match i64::try_from(inserted_id) {
            Ok(id) => Value::Int(id),
            Err(_) => Value::Decimal(Decimal::from(inserted_id)),
        }),
        _ => None,
    }
}

fn select_by_key_sql(dialect: &MySqlDialect, qualified: &str, column: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ? LIMIT 1",
        qualified,
        dialect.quote_ident(column)
    )
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn ping(&self) -> EngineResult<()> {
        with_timeout(self.query_timeout, sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryResult> {
        let start = Instant::now();

        if returns_rows(sql) {
            let mysql_rows = self.fetch(sql, params).await?;
            let execution_time_ms = elapsed_ms(start);
            let fields = match mysql_rows.first() {
                Some(first) => Self::field_info(first),
                None => self.describe_fields(sql).await,
            };

            return Ok(QueryResult {
                rows: mysql_rows.iter().map(Self::convert_row).collect(),
                fields,
                affected_rows: None,
                execution_time_ms,
            });
        }

        let affected = if params.is_empty() {
            self.run_raw(sql).await?
        } else {
            let query = Self::build_query(sql, params);
            with_timeout(self.query_timeout, query.execute(&self.pool))
                .await?
                .rows_affected()
        };

        Ok(QueryResult::with_affected_rows(affected, elapsed_ms(start)))
    }

    async fn execute_script(
        &self,
        statements: &mut StatementStream<'_>,
    ) -> EngineResult<ImportReport> {
        let start = Instant::now();
        let mut conn = self.pool.acquire().await.map_err(EngineError::from_query)?;
        let mut report = ImportReport::default();

        for (offset, statement) in statements.enumerate() {
            let index = offset + 1;
            let outcome = with_timeout(
                self.query_timeout,
                (&mut *conn).execute(sqlx::raw_sql(&statement)),
            )
            .await;

            match outcome {
                Ok(_) => report.record_success(),
                Err(err) => {
                    warn!(database = %self.name, index, error = %err, "Statement failed");
                    report.record_failure(index, &statement, err.to_string());
                }
            }
        }

        report.execution_time_ms = elapsed_ms(start);
        Ok(report)
    }

    async fn list_databases(&self) -> EngineResult<Vec<String>> {
        with_timeout(
            self.query_timeout,
            sqlx::query_scalar(LIST_DATABASES_SQL).fetch_all(&self.pool),
        )
        .await
    }

    /// A MySQL session has exactly one schema: the connected database.
    async fn list_schemas(&self) -> EngineResult<Vec<String>> {
        let current: Option<String> = with_timeout(
            self.query_timeout,
            sqlx::query_scalar("SELECT CAST(DATABASE() AS CHAR)").fetch_one(&self.pool),
        )
        .await?;
        Ok(current.into_iter().collect())
    }

    async fn list_tables(&self, _schema: &str) -> EngineResult<Vec<TableInfo>> {
        let rows: Vec<(String, String, i64, i64)> = with_timeout(
            self.query_timeout,
            sqlx::query_as(LIST_TABLES_SQL).fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(schema, name, size_bytes, row_estimate)| TableInfo {
                schema,
                name,
                size_bytes,
                size: format_bytes(size_bytes),
                row_estimate,
            })
            .collect())
    }

    async fn get_table_structure(&self, _schema: &str, table: &str) -> EngineResult<TableStructure> {
        type ColumnRow = (
            String,
            String,
            String,
            String,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<String>,
        );
        type ConstraintRow = (
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        type IndexRow = (String, Option<String>, i64, Option<String>);

        let column_rows: Vec<ColumnRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(COLUMNS_SQL).bind(table).fetch_all(&self.pool),
        )
        .await?;

        let constraint_rows: Vec<ConstraintRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(CONSTRAINTS_SQL).bind(table).fetch_all(&self.pool),
        )
        .await?;

        let index_rows: Vec<IndexRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(INDEXES_SQL).bind(table).fetch_all(&self.pool),
        )
        .await?;

        let checks = if constraint_rows
            .iter()
            .any(|(_, word, ..)| normalize_constraint_type(word) == Some(ConstraintKind::Check))
        {
            self.check_clauses().await
        } else {
            HashMap::new()
        };

        let constraints: Vec<ConstraintInfo> = constraint_rows
            .into_iter()
            .filter_map(|(name, word, columns, ref_schema, ref_table, ref_columns)| {
                let kind = normalize_constraint_type(&word)?;
                let references = match (kind, ref_table) {
                    (ConstraintKind::ForeignKey, Some(table)) => Some(ForeignKeyTarget {
                        schema: ref_schema,
                        table,
                        columns: split_list(ref_columns),
                    }),
                    _ => None,
                };
                let definition = match kind {
                    ConstraintKind::Check => checks.get(&name).map(|c| format!("CHECK ({})", c)),
                    _ => None,
                };
                Some(ConstraintInfo {
                    name,
                    kind,
                    columns: split_list(columns),
                    references,
                    definition,
                })
            })
            .collect();

        let primary: HashSet<&str> = constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::PrimaryKey)
            .flat_map(|c| c.columns.iter().map(String::as_str))
            .collect();

        let columns = column_rows
            .into_iter()
            .map(
                |(name, data_type, engine_type, nullable, default_value, max_length, precision, scale, key, extra)| {
                    let is_primary_key =
                        primary.contains(name.as_str()) || key.as_deref() == Some("PRI");
                    let is_auto_increment = extra
                        .map(|e| e.to_ascii_lowercase().contains("auto_increment"))
                        .unwrap_or(false);
                    ColumnInfo {
                        name,
                        data_type,
                        engine_type,
                        nullable: nullable.eq_ignore_ascii_case("YES"),
                        default_value,
                        max_length,
                        numeric_precision: precision,
                        numeric_scale: scale,
                        is_primary_key,
                        is_auto_increment,
                    }
                },
            )
            .collect();

        let indexes = index_rows
            .into_iter()
            .map(|(name, columns, non_unique, method)| IndexInfo {
                is_primary: name == "PRIMARY",
                is_unique: non_unique == 0,
                name,
                columns: split_list(columns),
                method,
                definition: None,
            })
            .collect();

        Ok(TableStructure {
            columns,
            constraints,
            indexes,
        })
    }

    async fn get_table_data(
        &self,
        schema: &str,
        table: &str,
        request: &TableDataRequest,
    ) -> EngineResult<TableData> {
        let columns = self.column_types(table).await?;
        if columns.is_empty() {
            return Err(EngineError::invalid_input(format!("Table not found: {}", table)));
        }

        let qualified = self.dialect.qualify(schema, table);
        let page = build_page_query(&self.dialect, &qualified, &columns, request)?;

        let count_rows = self.fetch(&page.count_sql, &page.count_params).await?;
        let total = count_rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .unwrap_or(0)
            .max(0) as u64;

        let mysql_rows = self.fetch(&page.select_sql, &page.select_params).await?;
        let fields = match mysql_rows.first() {
            Some(first) => Self::field_info(first),
            None => columns
                .iter()
                .map(|c| FieldInfo {
                    name: c.name.clone(),
                    type_name: c.sql_type.clone(),
                })
                .collect(),
        };

        Ok(TableData {
            rows: mysql_rows.iter().map(Self::convert_row).collect(),
            fields,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: total_pages(total, request.page_size),
        })
    }

    async fn get_database_stats(&self) -> EngineResult<DatabaseStats> {
        let (version, current_db, db_size_bytes, max_connections): (String, Option<String>, i64, i64) =
            with_timeout(
                self.query_timeout,
                sqlx::query_as(STATS_SQL).fetch_one(&self.pool),
            )
            .await?;
        let (active_connections, uptime_secs) = self.status_counters().await;

        Ok(DatabaseStats {
            version,
            current_db: current_db.unwrap_or_default(),
            db_size: format_bytes(db_size_bytes),
            db_size_bytes,
            active_connections,
            max_connections,
            uptime: format_uptime(uptime_secs),
        })
    }

    async fn get_active_connections(&self) -> EngineResult<Vec<ConnectionInfo>> {
        type ProcessRow = (
            i64,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<i64>,
        );

        let rows: Vec<ProcessRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(ACTIVE_CONNECTIONS_SQL).fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(pid, user, database, client, command, query, time)| ConnectionInfo {
                pid,
                user,
                database,
                client,
                application: None,
                state: command,
                query,
                duration_secs: time.map(|t| t as f64),
            })
            .collect())
    }

    async fn get_slow_queries(&self) -> EngineResult<Vec<Row>> {
        match self.fetch(SLOW_QUERIES_SQL, std::iter::empty()).await {
            Ok(rows) => Ok(rows.iter().map(Self::convert_row).collect()),
            Err(err) => {
                debug!(database = %self.name, error = %err, "mysql.slow_log unavailable");
                Ok(Vec::new())
            }
        }
    }

    async fn primary_key_columns(&self, _schema: &str, table: &str) -> EngineResult<Vec<String>> {
        with_timeout(
            self.query_timeout,
            sqlx::query_scalar(PRIMARY_KEY_SQL)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        primary_key: Option<&str>,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        let qualified = self.dialect.qualify(schema, table);
        let sql = insert_sql(&self.dialect, &qualified, data);

        let mut conn = self.pool.acquire().await.map_err(EngineError::from_query)?;
        let query = Self::build_query(&sql, data.columns.values());
        let result = with_timeout(self.query_timeout, query.execute(&mut *conn)).await?;

        let Some(pk) = primary_key else {
            return Ok(None);
        };

        let Some(lookup) = read_back_key(data, pk, result.last_insert_id()) else {
            return Ok(None);
        };

        let select = select_by_key_sql(&self.dialect, &qualified, pk);
        let row = with_timeout(
            self.query_timeout,
            Self::build_query(&select, std::iter::once(&lookup)).fetch_optional(&mut *conn),
        )
        .await?;

        Ok(row.as_ref().map(Self::convert_row))
    }

    async fn update_row(
        &self,
        schema: &str,
        table: &str,
        key: &RowKey,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        let qualified = self.dialect.qualify(schema, table);

        if !data.is_empty() {
            let sql = update_sql(&self.dialect, &qualified, key, data);
            let query = Self::build_query(&sql, data.columns.values().chain(std::iter::once(&key.value)));
            with_timeout(self.query_timeout, query.execute(&self.pool)).await?;
        }

        // The key itself may have been rewritten
        let lookup = data.columns.get(&key.column).unwrap_or(&key.value);
        let select = select_by_key_sql(&self.dialect, &qualified, &key.column);
        self.fetch_optional_row(&select, std::iter::once(lookup)).await
    }

    async fn delete_row(&self, schema: &str, table: &str, key: &RowKey) -> EngineResult<Option<Row>> {
        let qualified = self.dialect.qualify(schema, table);
        let select = select_by_key_sql(&self.dialect, &qualified, &key.column);
        let existing = self.fetch_optional_row(&select, std::iter::once(&key.value)).await?;

        if existing.is_some() {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                qualified,
                self.dialect.quote_ident(&key.column)
            );
            let query = Self::build_query(&sql, std::iter::once(&key.value));
            with_timeout(self.query_timeout, query.execute(&self.pool)).await?;
        }

        Ok(existing)
    }

    async fn create_database(&self, name: &str, owner: Option<&str>) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid_input("Database name is required"));
        }
        if owner.is_some() {
            debug!(database = %self.name, "MySQL databases have no owner; ignoring");
        }
        self.run_raw(&format!("CREATE DATABASE {}", self.dialect.quote_ident(name)))
            .await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid_input("Database name is required"));
        }
        self.run_raw(&format!("DROP DATABASE {}", self.dialect.quote_ident(name)))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(database = %self.name, "Closed MySQL pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ConfigSource;

    #[test]
    fn connect_options_follow_config() {
        let config = DatabaseConfig {
            name: "legacy".to_string(),
            host: "mysql.internal".to_string(),
            port: 3307,
            user: "root".to_string(),
            password: "pw".to_string(),
            database: "shop".to_string(),
            engine: EngineKind::Mariadb,
            source: ConfigSource::Dynamic,
            ssl: false,
            read_only: true,
        };
        let options = MySqlDriver::connect_options(&config);
        assert_eq!(options.get_host(), "mysql.internal");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_database(), Some("shop"));
    }

    #[test]
    fn constraint_words_normalize_to_codes() {
        assert_eq!(
            normalize_constraint_type("PRIMARY KEY"),
            Some(ConstraintKind::PrimaryKey)
        );
        assert_eq!(
            normalize_constraint_type("foreign key"),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(normalize_constraint_type("UNIQUE"), Some(ConstraintKind::Unique));
        assert_eq!(normalize_constraint_type("CHECK"), Some(ConstraintKind::Check));
        assert_eq!(normalize_constraint_type("TRIGGER"), None);
    }

    #[test]
    fn group_concat_lists_split_on_commas() {
        assert_eq!(
            split_list(Some("tenant_id,id".to_string())),
            vec!["tenant_id".to_string(), "id".to_string()]
        );
        assert!(split_list(None).is_empty());
        assert!(split_list(Some(String::new())).is_empty());
    }

    #[test]
    fn mutation_statements_use_question_marks() {
        let data = RowData::new()
            .with_column("name", Value::Text("Ann".into()))
            .with_column("email", Value::Text("a@x".into()));
        assert_eq!(
            insert_sql(&MySqlDialect, "`users`", &data),
            "INSERT INTO `users` (`email`, `name`) VALUES (?, ?)"
        );
        assert_eq!(
            insert_sql(&MySqlDialect, "`users`", &RowData::new()),
            "INSERT INTO `users` () VALUES ()"
        );

        let key = RowKey::new("id", Value::Int(3));
        assert_eq!(
            update_sql(&MySqlDialect, "`users`", &key, &data),
            "UPDATE `users` SET `email` = ?, `name` = ? WHERE `id` = ?"
        );
        assert_eq!(
            select_by_key_sql(&MySqlDialect, "`users`", "id"),
            "SELECT * FROM `users` WHERE `id` = ? LIMIT 1"
        );
    }

    #[test]
    fn inserted_rows_are_found_by_supplied_key_first() {
        let data = RowData::new()
            .with_column("code", Value::Text("EU".into()))
            .with_column("name", Value::Text("Europe".into()));
        assert_eq!(
            read_back_key(&data, "code", 0),
            Some(Value::Text("EU".into()))
        );
        assert_eq!(
            read_back_key(&data, "code", 41),
            Some(Value::Text("EU".into()))
        );
    }

    #[test]
    fn generated_ids_are_used_when_no_key_is_supplied() {
        let data = RowData::new()
            .with_column("id", Value::Null)
            .with_column("name", Value::Text("Ann".into()));
        assert_eq!(read_back_key(&data, "id", 42), Some(Value::Int(42)));
        assert_eq!(
            read_back_key(&RowData::new(), "id", u64::MAX),
            Some(Value::Decimal(Decimal::from(u64::MAX)))
        );
        assert_eq!(read_back_key(&data, "id", 0), None);
    }
}
