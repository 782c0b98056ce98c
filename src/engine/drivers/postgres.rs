//! PostgreSQL Driver
//!
//! Implements the DatabaseDriver trait for PostgreSQL and Supabase using SQLx.
//!
//! ## Import batches
//!
//! `execute_script` runs on one pooled connection. While the script has an
//! explicit transaction open, each statement is wrapped in a savepoint so a
//! failing statement is rolled back alone and the batch keeps going.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, PgSslMode,
    Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, Decode, Executor, Row as SqlxRow, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use super::{elapsed_ms, with_timeout};
use crate::engine::dialect::{Dialect, PostgresDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::humanize::{format_bytes, format_uptime};
use crate::engine::paginator::{build_page_query, total_pages, ColumnType};
use crate::engine::sql_safety::{returns_rows, transaction_control, TransactionControl};
use crate::engine::traits::{DatabaseDriver, StatementStream};
use crate::engine::types::{
    ColumnInfo, ConnectionInfo, ConstraintInfo, ConstraintKind, DatabaseConfig, DatabaseStats,
    DriverOptions, EngineKind, FieldInfo, ForeignKeyTarget, ImportReport, IndexInfo, QueryResult,
    Row, RowData, RowKey, TableData, TableDataRequest, TableInfo, TableStructure, Value,
};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

const SAVEPOINT: &str = "dbdeck_statement";

/// Transaction state of a script while it runs
#[derive(Debug, Default)]
struct ScriptTransaction {
    open: bool,
}

/// How one script statement is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatementPlan {
    control: Option<TransactionControl>,
    guarded: bool,
}

impl StatementPlan {
    fn before(&self) -> Option<String> {
        self.guarded.then(|| format!("SAVEPOINT {}", SAVEPOINT))
    }

    fn after(&self, succeeded: bool) -> Option<String> {
        match (self.guarded, succeeded) {
            (false, _) => None,
            (true, true) => Some(format!("RELEASE SAVEPOINT {}", SAVEPOINT)),
            (true, false) => Some(format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT)),
        }
    }
}

impl ScriptTransaction {
    /// Statements inside an explicit transaction run under a savepoint;
    /// the transaction control statements themselves never do.
    fn plan(&self, statement: &str) -> StatementPlan {
        let control = transaction_control(statement);
        StatementPlan {
            control,
            guarded: self.open && control.is_none(),
        }
    }

    /// A failed BEGIN opens nothing; COMMIT and ROLLBACK end the block even
    /// when the server reports an error for them.
    fn record(&mut self, plan: &StatementPlan, succeeded: bool) {
        match plan.control {
            Some(TransactionControl::Begin) if succeeded => self.open = true,
            Some(TransactionControl::End) => self.open = false,
            _ => {}
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

const LIST_DATABASES_SQL: &str = r#"
    SELECT datname::text
    FROM pg_catalog.pg_database
    WHERE NOT datistemplate
    ORDER BY datname
"#;

const LIST_SCHEMAS_SQL: &str = r#"
    SELECT schema_name::text
    FROM information_schema.schemata
    WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
      AND schema_name NOT LIKE 'pg_toast%'
      AND schema_name NOT LIKE 'pg_temp%'
    ORDER BY schema_name
"#;

const LIST_TABLES_SQL: &str = r#"
    SELECT t.schemaname::text,
           t.tablename::text,
           pg_total_relation_size(format('%I.%I', t.schemaname, t.tablename)::regclass)::int8,
           COALESCE(s.n_live_tup, 0)::int8
    FROM pg_catalog.pg_tables t
    LEFT JOIN pg_catalog.pg_stat_user_tables s
      ON s.schemaname = t.schemaname AND s.relname = t.tablename
    WHERE t.schemaname = $1
    ORDER BY t.tablename
"#;

const COLUMNS_SQL: &str = r#"
    SELECT c.column_name::text,
           c.data_type::text,
           c.udt_name::text,
           c.is_nullable = 'YES',
           c.column_default::text,
           c.character_maximum_length::int8,
           c.numeric_precision::int8,
           c.numeric_scale::int8,
           COALESCE(c.is_identity = 'YES' OR c.column_default LIKE 'nextval(%', false)
    FROM information_schema.columns c
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const COLUMN_TYPES_SQL: &str = r#"
    SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT con.conname::text,
           con.contype::text,
           ARRAY(
               SELECT a.attname::text
               FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_catalog.pg_attribute a
                 ON a.attrelid = con.conrelid AND a.attnum = k.attnum
               ORDER BY k.ord
           ),
           fn.nspname::text,
           fc.relname::text,
           ARRAY(
               SELECT a.attname::text
               FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
               JOIN pg_catalog.pg_attribute a
                 ON a.attrelid = con.confrelid AND a.attnum = k.attnum
               ORDER BY k.ord
           ),
           pg_get_constraintdef(con.oid)
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
    LEFT JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2
    ORDER BY con.contype, con.conname
"#;

const INDEXES_SQL: &str = r#"
    SELECT i.relname::text,
           ARRAY(
               SELECT COALESCE(a.attname::text, pg_get_indexdef(ix.indexrelid, k.ord::int, true))
               FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
               LEFT JOIN pg_catalog.pg_attribute a
                 ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
               ORDER BY k.ord
           ),
           ix.indisunique,
           ix.indisprimary,
           am.amname::text,
           pg_get_indexdef(ix.indexrelid)
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_am am ON am.oid = i.relam
    WHERE n.nspname = $1 AND t.relname = $2
    ORDER BY i.relname
"#;

const PRIMARY_KEY_SQL: &str = r#"
    SELECT a.attname::text
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class c ON c.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(ix.indkey)
    WHERE ix.indisprimary AND n.nspname = $1 AND c.relname = $2
    ORDER BY array_position(ix.indkey::int2[], a.attnum)
"#;

const STATS_SQL: &str = r#"
    SELECT version(),
           current_database()::text,
           pg_database_size(current_database())::int8,
           (SELECT count(*) FROM pg_stat_activity WHERE datname = current_database())::int8,
           current_setting('max_connections')::int8,
           EXTRACT(EPOCH FROM now() - pg_postmaster_start_time())::int8
"#;

const ACTIVE_CONNECTIONS_SQL: &str = r#"
    SELECT pid::int8,
           usename::text,
           datname::text,
           client_addr::text,
           application_name::text,
           state::text,
           query::text,
           EXTRACT(EPOCH FROM now() - query_start)::float8
    FROM pg_stat_activity
    WHERE datname = current_database() AND pid <> pg_backend_pid()
    ORDER BY query_start DESC NULLS LAST
"#;

const SLOW_QUERIES_SQL: &str = r#"
    SELECT query, calls, total_exec_time, mean_exec_time, rows
    FROM pg_stat_statements
    ORDER BY mean_exec_time DESC
    LIMIT 20
"#;

/// PostgreSQL driver bound to one configured database
pub struct PostgresDriver {
    name: String,
    engine: EngineKind,
    pool: PgPool,
    query_timeout: Duration,
    dialect: PostgresDialect,
}

impl PostgresDriver {
    /// Opens the pool eagerly so bad credentials fail here, not on first use.
    pub async fn connect(config: &DatabaseConfig, options: &DriverOptions) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect_with(Self::connect_options(config))
            .await
            .map_err(EngineError::from_connect)?;

        info!(
            database = %config.name,
            host = %config.host,
            engine = %config.engine,
            "Opened PostgreSQL pool"
        );

        Ok(Self {
            name: config.name.clone(),
            engine: config.engine,
            pool,
            query_timeout: options.query_timeout,
            dialect: PostgresDialect,
        })
    }

    fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
        let ssl_mode = if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(ssl_mode)
            .application_name("dbdeck")
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> Row {
        let mut row = Row::new();
        for col in pg_row.columns() {
            row.push(col.name(), Self::extract_value(pg_row, col.ordinal()));
        }
        row
    }

    /// Helper to bind a Value to a Postgres query
    fn bind_param<'q>(query: PgQuery<'q>, value: &'q Value) -> PgQuery<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Json(j) => query.bind(j),
            Value::Array(items) => query.bind(
                items
                    .iter()
                    .map(|v| (!v.is_null()).then(|| v.to_display()))
                    .collect::<Vec<Option<String>>>(),
            ),
            Value::Decimal(d) => query.bind(d),
            Value::Timestamp(ts) => query.bind(ts),
            Value::TimestampTz(ts) => query.bind(ts),
            Value::Date(d) => query.bind(d),
            Value::Time(t) => query.bind(t),
            Value::Bytes(b) => query.bind(b),
        }
    }

    fn build_query<'q>(sql: &'q str, params: impl IntoIterator<Item = &'q Value>) -> PgQuery<'q> {
        params
            .into_iter()
            .fold(sqlx::query(sql), |query, value| Self::bind_param(query, value))
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        // Integers before bool so int columns never decode as flags
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
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
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<Option<String>>>, _>(idx) {
            return v
                .map(|items| {
                    Value::Array(items.into_iter().map(|s| s.map(Value::Text).unwrap_or(Value::Null)).collect())
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<Option<i64>>>, _>(idx) {
            return v
                .map(|items| {
                    Value::Array(items.into_iter().map(|i| i.map(Value::Int).unwrap_or(Value::Null)).collect())
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<Option<i32>>>, _>(idx) {
            return v
                .map(|items| {
                    Value::Array(
                        items
                            .into_iter()
                            .map(|i| i.map(|n| Value::Int(n as i64)).unwrap_or(Value::Null))
                            .collect(),
                    )
                })
                .unwrap_or(Value::Null);
        }

        // Enums and other textual types the typed decoders reject
        match row.try_get_raw(idx) {
            Ok(raw) if !raw.is_null() => <String as Decode<'_, Postgres>>::decode(raw)
                .map(Value::Text)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Gets field info from a PgRow
    fn field_info(row: &PgRow) -> Vec<FieldInfo> {
        row.columns()
            .iter()
            .map(|col| FieldInfo {
                name: col.name().to_string(),
                type_name: col.type_info().name().to_string(),
            })
            .collect()
    }

    /// Field list of a statement that returned no rows
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
    ) -> EngineResult<Vec<PgRow>> {
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

    async fn run_on(&self, conn: &mut PgConnection, sql: &str) -> EngineResult<()> {
        with_timeout(self.query_timeout, conn.execute(sqlx::raw_sql(sql))).await?;
        Ok(())
    }

    /// Column names and `format_type` spellings, in column order
    async fn column_types(&self, schema: &str, table: &str) -> EngineResult<Vec<ColumnType>> {
        let rows: Vec<(String, String)> = with_timeout(
            self.query_timeout,
            sqlx::query_as(COLUMN_TYPES_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, sql_type)| ColumnType::new(name, sql_type))
            .collect())
    }

    async fn column_type_map(&self, schema: &str, table: &str) -> EngineResult<HashMap<String, String>> {
        Ok(self
            .column_types(schema, table)
            .await?
            .into_iter()
            .map(|c| (c.name, c.sql_type))
            .collect())
    }
}

fn check_columns(table: &str, data: &RowData, types: &HashMap<String, String>) -> EngineResult<()> {
    if types.is_empty() {
        return Ok(());
    }
    match data.columns.keys().find(|name| !types.contains_key(*name)) {
        Some(unknown) => Err(EngineError::invalid_input(format!(
            "Unknown column {} on {}",
            unknown, table
        ))),
        None => Ok(()),
    }
}

fn insert_sql(
    dialect: &PostgresDialect,
    qualified: &str,
    data: &RowData,
    types: &HashMap<String, String>,
) -> String {
    if data.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES RETURNING *", qualified);
    }

    let columns: Vec<String> = data.columns.keys().map(|k| dialect.quote_ident(k)).collect();
    let placeholders: Vec<String> = data
        .columns
        .keys()
        .enumerate()
        .map(|(i, k)| dialect.typed_placeholder(i + 1, types.get(k).map(String::as_str)))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        qualified,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn update_sql(
    dialect: &PostgresDialect,
    qualified: &str,
    key: &RowKey,
    data: &RowData,
    types: &HashMap<String, String>,
) -> String {
    let assignments: Vec<String> = data
        .columns
        .keys()
        .enumerate()
        .map(|(i, k)| {
            format!(
                "{} = {}",
                dialect.quote_ident(k),
                dialect.typed_placeholder(i + 1, types.get(k).map(String::as_str))
            )
        })
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING *",
        qualified,
        assignments.join(", "),
        dialect.quote_ident(&key.column),
        dialect.typed_placeholder(
            data.columns.len() + 1,
            types.get(&key.column).map(String::as_str)
        )
    )
}

fn key_predicate(dialect: &PostgresDialect, key: &RowKey, types: &HashMap<String, String>) -> String {
    format!(
        "{} = {}",
        dialect.quote_ident(&key.column),
        dialect.typed_placeholder(1, types.get(&key.column).map(String::as_str))
    )
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
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
            let pg_rows = self.fetch(sql, params).await?;
            let execution_time_ms = elapsed_ms(start);
            let fields = match pg_rows.first() {
                Some(first) => Self::field_info(first),
                None => self.describe_fields(sql).await,
            };

            return Ok(QueryResult {
                rows: pg_rows.iter().map(Self::convert_row).collect(),
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
        let mut transaction = ScriptTransaction::default();

        for (offset, statement) in statements.enumerate() {
            let index = offset + 1;
            let plan = transaction.plan(&statement);

            if let Some(savepoint) = plan.before() {
                if let Err(err) = self.run_on(&mut conn, &savepoint).await {
                    debug!(index, error = %err, "Savepoint failed");
                }
            }

            let outcome = self.run_on(&mut conn, &statement).await;
            if let Some(cleanup) = plan.after(outcome.is_ok()) {
                if let Err(err) = self.run_on(&mut conn, &cleanup).await {
                    debug!(index, error = %err, "Savepoint cleanup failed");
                }
            }
            transaction.record(&plan, outcome.is_ok());

            match outcome {
                Ok(()) => report.record_success(),
                Err(err) => {
                    warn!(database = %self.name, index, error = %err, "Statement failed");
                    report.record_failure(index, &statement, err.to_string());
                }
            }
        }

        if transaction.is_open() {
            warn!(database = %self.name, "Script ended inside a transaction; rolling back");
            if let Err(err) = self.run_on(&mut conn, "ROLLBACK").await {
                debug!(error = %err, "Rollback of unterminated transaction failed");
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

    async fn list_schemas(&self) -> EngineResult<Vec<String>> {
        with_timeout(
            self.query_timeout,
            sqlx::query_scalar(LIST_SCHEMAS_SQL).fetch_all(&self.pool),
        )
        .await
    }

    async fn list_tables(&self, schema: &str) -> EngineResult<Vec<TableInfo>> {
        let rows: Vec<(String, String, i64, i64)> = with_timeout(
            self.query_timeout,
            sqlx::query_as(LIST_TABLES_SQL).bind(schema).fetch_all(&self.pool),
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

    async fn get_table_structure(&self, schema: &str, table: &str) -> EngineResult<TableStructure> {
        type ColumnRow = (
            String,
            String,
            String,
            bool,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            bool,
        );
        type ConstraintRow = (
            String,
            String,
            Vec<String>,
            Option<String>,
            Option<String>,
            Vec<String>,
            Option<String>,
        );
        type IndexRow = (String, Vec<String>, bool, bool, Option<String>, Option<String>);

        let column_rows: Vec<ColumnRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(COLUMNS_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        let constraint_rows: Vec<ConstraintRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(CONSTRAINTS_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        let index_rows: Vec<IndexRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(INDEXES_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        // Codes outside the contract (not-null, trigger) are skipped
        let constraints: Vec<ConstraintInfo> = constraint_rows
            .into_iter()
            .filter_map(
                |(name, code, columns, ref_schema, ref_table, ref_columns, definition)| {
                    let kind = ConstraintKind::from_code(&code)?;
                    let references = match (kind, ref_table) {
                        (ConstraintKind::ForeignKey, Some(table)) => Some(ForeignKeyTarget {
                            schema: ref_schema,
                            table,
                            columns: ref_columns,
                        }),
                        _ => None,
                    };
                    Some(ConstraintInfo {
                        name,
                        kind,
                        columns,
                        references,
                        definition,
                    })
                },
            )
            .collect();

        let primary: HashSet<&str> = constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::PrimaryKey)
            .flat_map(|c| c.columns.iter().map(String::as_str))
            .collect();

        let columns = column_rows
            .into_iter()
            .map(
                |(name, data_type, engine_type, nullable, default_value, max_length, precision, scale, auto)| {
                    let is_primary_key = primary.contains(name.as_str());
                    ColumnInfo {
                        name,
                        data_type,
                        engine_type,
                        nullable,
                        default_value,
                        max_length,
                        numeric_precision: precision,
                        numeric_scale: scale,
                        is_primary_key,
                        is_auto_increment: auto,
                    }
                },
            )
            .collect();

        let indexes = index_rows
            .into_iter()
            .map(|(name, columns, is_unique, is_primary, method, definition)| IndexInfo {
                name,
                columns,
                is_unique,
                is_primary,
                method,
                definition,
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
        let columns = self.column_types(schema, table).await?;
        if columns.is_empty() {
            return Err(EngineError::invalid_input(format!(
                "Table not found: {}.{}",
                schema, table
            )));
        }

        let qualified = self.dialect.qualify(schema, table);
        let page = build_page_query(&self.dialect, &qualified, &columns, request)?;

        let count_rows = self.fetch(&page.count_sql, &page.count_params).await?;
        let total = count_rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .unwrap_or(0)
            .max(0) as u64;

        let pg_rows = self.fetch(&page.select_sql, &page.select_params).await?;
        let fields = match pg_rows.first() {
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
            rows: pg_rows.iter().map(Self::convert_row).collect(),
            fields,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: total_pages(total, request.page_size),
        })
    }

    async fn get_database_stats(&self) -> EngineResult<DatabaseStats> {
        let (version, current_db, db_size_bytes, active_connections, max_connections, uptime_secs): (
            String,
            String,
            i64,
            i64,
            i64,
            i64,
        ) = with_timeout(
            self.query_timeout,
            sqlx::query_as(STATS_SQL).fetch_one(&self.pool),
        )
        .await?;

        Ok(DatabaseStats {
            version,
            current_db,
            db_size: format_bytes(db_size_bytes),
            db_size_bytes,
            active_connections,
            max_connections,
            uptime: format_uptime(uptime_secs),
        })
    }

    async fn get_active_connections(&self) -> EngineResult<Vec<ConnectionInfo>> {
        type ActivityRow = (
            i64,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
        );

        let rows: Vec<ActivityRow> = with_timeout(
            self.query_timeout,
            sqlx::query_as(ACTIVE_CONNECTIONS_SQL).fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(pid, user, database, client, application, state, query, duration_secs)| ConnectionInfo {
                    pid,
                    user,
                    database,
                    client,
                    application,
                    state,
                    query,
                    duration_secs,
                },
            )
            .collect())
    }

    async fn get_slow_queries(&self) -> EngineResult<Vec<Row>> {
        match self.fetch(SLOW_QUERIES_SQL, std::iter::empty()).await {
            Ok(rows) => Ok(rows.iter().map(Self::convert_row).collect()),
            Err(err) => {
                debug!(database = %self.name, error = %err, "pg_stat_statements unavailable");
                Ok(Vec::new())
            }
        }
    }

    async fn primary_key_columns(&self, schema: &str, table: &str) -> EngineResult<Vec<String>> {
        with_timeout(
            self.query_timeout,
            sqlx::query_scalar(PRIMARY_KEY_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        _primary_key: Option<&str>,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        let types = self.column_type_map(schema, table).await?;
        check_columns(table, data, &types)?;

        let qualified = self.dialect.qualify(schema, table);
        let sql = insert_sql(&self.dialect, &qualified, data, &types);
        self.fetch_optional_row(&sql, data.columns.values()).await
    }

    async fn update_row(
        &self,
        schema: &str,
        table: &str,
        key: &RowKey,
        data: &RowData,
    ) -> EngineResult<Option<Row>> {
        let types = self.column_type_map(schema, table).await?;
        check_columns(table, data, &types)?;
        let qualified = self.dialect.qualify(schema, table);

        if data.is_empty() {
            let sql = format!(
                "SELECT * FROM {} WHERE {} LIMIT 1",
                qualified,
                key_predicate(&self.dialect, key, &types)
            );
            return self.fetch_optional_row(&sql, std::iter::once(&key.value)).await;
        }

        let sql = update_sql(&self.dialect, &qualified, key, data, &types);
        let params = data.columns.values().chain(std::iter::once(&key.value));
        self.fetch_optional_row(&sql, params).await
    }

    async fn delete_row(&self, schema: &str, table: &str, key: &RowKey) -> EngineResult<Option<Row>> {
        let types = self.column_type_map(schema, table).await?;
        let sql = format!(
            "DELETE FROM {} WHERE {} RETURNING *",
            self.dialect.qualify(schema, table),
            key_predicate(&self.dialect, key, &types)
        );
        self.fetch_optional_row(&sql, std::iter::once(&key.value)).await
    }

    async fn create_database(&self, name: &str, owner: Option<&str>) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid_input("Database name is required"));
        }

        let mut sql = format!("CREATE DATABASE {}", self.dialect.quote_ident(name));
        if let Some(owner) = owner.filter(|o| !o.trim().is_empty()) {
            sql.push_str(" OWNER ");
            sql.push_str(&self.dialect.quote_ident(owner));
        }
        self.run_raw(&sql).await?;
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
        info!(database = %self.name, "Closed PostgreSQL pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ConfigSource;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            name: "main".to_string(),
            host: "db.internal".to_string(),
            port: 6543,
            user: "app".to_string(),
            password: "pass".to_string(),
            database: "shop".to_string(),
            engine: EngineKind::Supabase,
            source: ConfigSource::Static,
            ssl: true,
            read_only: false,
        }
    }

    fn types() -> HashMap<String, String> {
        [("id", "integer"), ("name", "character varying(80)"), ("tags", "text[]")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn connect_options_follow_config() {
        let options = PostgresDriver::connect_options(&config());
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("shop"));
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn insert_casts_each_value_to_its_column_type() {
        let data = RowData::new()
            .with_column("name", Value::Text("Ann".into()))
            .with_column("tags", Value::Array(vec![Value::Text("a".into())]));
        let sql = insert_sql(&PostgresDialect, "\"public\".\"users\"", &data, &types());
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"users\" (\"name\", \"tags\") VALUES \
             (CAST($1 AS character varying(80)), CAST($2 AS text[])) RETURNING *"
        );
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let sql = insert_sql(&PostgresDialect, "t", &RowData::new(), &types());
        assert_eq!(sql, "INSERT INTO t DEFAULT VALUES RETURNING *");
    }

    #[test]
    fn update_binds_key_after_assignments() {
        let data = RowData::new().with_column("name", Value::Text("Bo".into()));
        let key = RowKey::new("id", Value::Int(7));
        let sql = update_sql(&PostgresDialect, "t", &key, &data, &types());
        assert_eq!(
            sql,
            "UPDATE t SET \"name\" = CAST($1 AS character varying(80)) \
             WHERE \"id\" = CAST($2 AS integer) RETURNING *"
        );
    }

    #[test]
    fn unknown_columns_are_rejected_before_querying() {
        let data = RowData::new().with_column("nope", Value::Null);
        let err = check_columns("users", &data, &types()).expect_err("unknown column");
        assert!(matches!(err, EngineError::InvalidInput { .. }));
        assert!(check_columns("users", &data, &HashMap::new()).is_ok());
    }

    /// Commands sent for a script whose statements succeed or fail as given,
    /// followed by whether a final rollback is needed.
    fn replay(script: &[(&str, bool)]) -> (Vec<String>, bool) {
        let mut transaction = ScriptTransaction::default();
        let mut sent = Vec::new();
        for (statement, succeeded) in script {
            let plan = transaction.plan(statement);
            sent.extend(plan.before());
            sent.push(statement.to_string());
            sent.extend(plan.after(*succeeded));
            transaction.record(&plan, *succeeded);
        }
        (sent, transaction.is_open())
    }

    #[test]
    fn statements_outside_transactions_are_not_wrapped() {
        let (sent, open) = replay(&[("CREATE TABLE t (id int)", true), ("bad", false)]);
        assert_eq!(sent, vec!["CREATE TABLE t (id int)", "bad"]);
        assert!(!open);
    }

    #[test]
    fn failures_inside_a_transaction_roll_back_to_their_savepoint() {
        let (sent, open) = replay(&[
            ("BEGIN", true),
            ("bad", false),
            ("INSERT INTO t VALUES (1)", true),
            ("COMMIT", true),
        ]);
        assert_eq!(
            sent,
            vec![
                "BEGIN",
                "SAVEPOINT dbdeck_statement",
                "bad",
                "ROLLBACK TO SAVEPOINT dbdeck_statement",
                "SAVEPOINT dbdeck_statement",
                "INSERT INTO t VALUES (1)",
                "RELEASE SAVEPOINT dbdeck_statement",
                "COMMIT",
            ]
        );
        assert!(!open);
    }

    #[test]
    fn script_ending_inside_a_transaction_needs_rollback() {
        let (sent, open) = replay(&[("BEGIN", true), ("INSERT INTO t VALUES (1)", true)]);
        assert_eq!(sent.len(), 4);
        assert!(open);

        let (_, open) = replay(&[("BEGIN", false), ("SELECT 1", true)]);
        assert!(!open);

        let (_, open) = replay(&[("START TRANSACTION", true), ("ROLLBACK", false)]);
        assert!(!open);
    }
}
