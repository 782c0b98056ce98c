//! DatabaseDriver trait definition
//!
//! This is the core abstraction every engine implements. One driver instance
//! owns the pool for one configured database; the registry hands out shared
//! references to it.

use async_trait::async_trait;

use crate::engine::dialect::Dialect;
use crate::engine::error::EngineResult;
use crate::engine::types::{
    ConnectionInfo, DatabaseStats, EngineKind, ImportReport, QueryResult, Row, RowData, RowKey,
    TableData, TableDataRequest, TableInfo, TableStructure, Value,
};

/// A stream of SQL statements consumed by `execute_script`.
pub type StatementStream<'a> = dyn Iterator<Item = String> + Send + 'a;

/// Core trait that all database drivers implement
///
/// PostgreSQL and MySQL diverge in catalogs, quoting, RETURNING support and
/// placeholder style; each driver carries its own dialect and catalog queries
/// behind this one interface.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Configured name of the database this driver serves
    fn name(&self) -> &str;

    /// Engine family of the connected server
    fn engine(&self) -> EngineKind;

    /// Quoting and rendering rules for this engine
    fn dialect(&self) -> &dyn Dialect;

    /// Round-trips a trivial statement to check the pool is usable
    async fn ping(&self) -> EngineResult<()>;

    /// Executes one parameterized statement
    ///
    /// Engine errors are returned verbatim.
    async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryResult>;

    /// Runs a sequence of statements on one reserved connection
    ///
    /// A failing statement is recorded in the report and the run continues.
    /// Only connection acquisition failures abort the batch.
    async fn execute_script(&self, statements: &mut StatementStream<'_>)
        -> EngineResult<ImportReport>;

    /// Lists databases visible to the configured user
    async fn list_databases(&self) -> EngineResult<Vec<String>>;

    /// Lists schemas of the connected database (MySQL: the database itself)
    async fn list_schemas(&self) -> EngineResult<Vec<String>>;

    /// Lists base tables with sizes and planner row estimates
    async fn list_tables(&self, schema: &str) -> EngineResult<Vec<TableInfo>>;

    /// Columns, constraints and indexes of one table, read live
    async fn get_table_structure(&self, schema: &str, table: &str)
        -> EngineResult<TableStructure>;

    /// One filtered, ordered page of table rows plus exact totals
    async fn get_table_data(
        &self,
        schema: &str,
        table: &str,
        request: &TableDataRequest,
    ) -> EngineResult<TableData>;

    async fn get_database_stats(&self) -> EngineResult<DatabaseStats>;

    async fn get_active_connections(&self) -> EngineResult<Vec<ConnectionInfo>>;

    /// Slowest statements recorded by the engine
    ///
    /// Returns an empty list when the statistics extension or table is not
    /// available.
    async fn get_slow_queries(&self) -> EngineResult<Vec<Row>>;

    /// Primary key columns of a table in key order; empty without a key
    async fn primary_key_columns(&self, schema: &str, table: &str) -> EngineResult<Vec<String>>;

    /// The primary key column when the key is exactly one column
    ///
    /// Composite keys yield `None`: a single column does not address one row.
    async fn get_primary_key(&self, schema: &str, table: &str) -> EngineResult<Option<String>> {
        let mut columns = self.primary_key_columns(schema, table).await?;
        Ok(if columns.len() == 1 { columns.pop() } else { None })
    }

    /// Inserts a row and returns its stored state
    ///
    /// `primary_key` names the key column used to read the row back where the
    /// engine has no RETURNING clause.
    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        primary_key: Option<&str>,
        data: &RowData,
    ) -> EngineResult<Option<Row>>;

    /// Updates the row identified by `key` and returns its new state
    async fn update_row(
        &self,
        schema: &str,
        table: &str,
        key: &RowKey,
        data: &RowData,
    ) -> EngineResult<Option<Row>>;

    /// Deletes the row identified by `key` and returns its last state
    async fn delete_row(&self, schema: &str, table: &str, key: &RowKey)
        -> EngineResult<Option<Row>>;

    async fn create_database(&self, name: &str, owner: Option<&str>) -> EngineResult<()>;

    async fn drop_database(&self, name: &str) -> EngineResult<()>;

    /// Closes the pool; later calls fail with a connection error
    async fn close(&self);
}
