//! Universal data types for the dbdeck engine layer
//!
//! These types give PostgreSQL and MySQL/MariaDB results one shape so
//! callers never look at the engine that produced them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Database engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Mysql,
    Mariadb,
    Supabase,
}

impl EngineKind {
    /// Parses the engine names accepted in configuration.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "mariadb" => Some(Self::Mariadb),
            "supabase" => Some(Self::Supabase),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Postgres | Self::Supabase => 5432,
            Self::Mysql | Self::Mariadb => 3306,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
            Self::Supabase => "supabase",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a database configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    #[default]
    Static,
    Dynamic,
}

/// Connection configuration for one named database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
    pub engine: EngineKind,
    #[serde(default)]
    pub source: ConfigSource,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub read_only: bool,
}

/// Pool sizing and timeouts applied to every driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub max_connections: u32,
    pub connect_timeout: std::time::Duration,
    pub query_timeout: std::time::Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: std::time::Duration::from_secs(5),
            query_timeout: std::time::Duration::from_secs(8),
        }
    }
}

/// Universal value representation
///
/// Untagged deserialization always lands on the first six variants; the
/// temporal and decimal variants are only produced when decoding rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Decimal(Decimal),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain-text rendering used for previews and logs.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Json(j) => j.to_string(),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_display).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Decimal(d) => d.to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Value::TimestampTz(ts) => ts.to_rfc3339(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Value::Bytes(b) => format!("[{} bytes]", b.len()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// Engine type name as reported by the driver (e.g. `INT4`, `VARCHAR`)
    pub type_name: String,
}

/// A single result row: field name to value, in select-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Row payload for mutation operations (column name -> value)
///
/// A `BTreeMap` keeps generated column lists in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowData {
    pub columns: BTreeMap<String, Value>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Identifies one row by its primary key column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowKey {
    pub column: String,
    pub value: Value,
}

impl RowKey {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Query execution result
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE)
    pub affected_rows: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_affected_rows(affected: u64, time_ms: f64) -> Self {
        Self {
            rows: Vec::new(),
            fields: Vec::new(),
            affected_rows: Some(affected),
            execution_time_ms: time_ms,
        }
    }
}

/// One entry of a table listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub size_bytes: i64,
    /// Human-readable size (e.g. "1.5 MB")
    pub size: String,
    /// Planner estimate, not an exact count
    pub row_estimate: i64,
}

/// Column metadata for table structure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type (`information_schema.columns.data_type`)
    pub data_type: String,
    /// Engine type name (Postgres `udt_name`, MySQL `COLUMN_TYPE`)
    pub engine_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
}

/// Constraint kind, normalized to the Postgres single-letter codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    #[serde(rename = "p")]
    PrimaryKey,
    #[serde(rename = "f")]
    ForeignKey,
    #[serde(rename = "u")]
    Unique,
    #[serde(rename = "c")]
    Check,
    #[serde(rename = "x")]
    Exclusion,
}

impl ConstraintKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(Self::PrimaryKey),
            "f" => Some(Self::ForeignKey),
            "u" => Some(Self::Unique),
            "c" => Some(Self::Check),
            "x" => Some(Self::Exclusion),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::PrimaryKey => 'p',
            Self::ForeignKey => 'f',
            Self::Unique => 'u',
            Self::Check => 'c',
            Self::Exclusion => 'x',
        }
    }
}

/// Target of a foreign key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyTarget {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub kind: ConstraintKind,
    /// Participating columns in constraint order
    pub columns: Vec<String>,
    pub references: Option<ForeignKeyTarget>,
    /// Engine-rendered definition when the catalog provides one
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub method: Option<String>,
    pub definition: Option<String>,
}

/// Live snapshot of a table's structure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStructure {
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableStructure {
    pub fn primary_key(&self) -> Option<&ConstraintInfo> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl FilterOperator {
    /// Null checks take no bound parameter.
    pub fn takes_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFilter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Pagination, ordering and filtering for a table data request
///
/// `page` and `page_size` are positive; entry points clamp them first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDataRequest {
    pub page: u32,
    pub page_size: u32,
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_dir: SortDirection,
    #[serde(default)]
    pub filters: Vec<DataFilter>,
}

impl Default for TableDataRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            order_by: None,
            order_dir: SortDirection::Asc,
            filters: Vec::new(),
        }
    }
}

/// One page of table data
#[derive(Debug, Clone, Serialize)]
pub struct TableData {
    pub rows: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub version: String,
    pub current_db: String,
    pub db_size: String,
    pub db_size_bytes: i64,
    pub active_connections: i64,
    pub max_connections: i64,
    pub uptime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub pid: i64,
    pub user: Option<String>,
    pub database: Option<String>,
    pub client: Option<String>,
    pub application: Option<String>,
    pub state: Option<String>,
    pub query: Option<String>,
    pub duration_secs: Option<f64>,
}

/// A statement that failed during a batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementError {
    /// 1-based position of the statement in the input
    pub index: usize,
    pub message: String,
    pub statement: String,
}

/// Outcome of a best-effort statement batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub statements_executed: usize,
    pub statements_failed: usize,
    pub errors: Vec<StatementError>,
    pub execution_time_ms: f64,
}

impl ImportReport {
    const PREVIEW_CHARS: usize = 200;

    pub fn record_success(&mut self) {
        self.statements_executed += 1;
    }

    pub fn record_failure(&mut self, index: usize, statement: &str, message: impl Into<String>) {
        self.statements_failed += 1;
        self.errors.push(StatementError {
            index,
            message: message.into(),
            statement: statement.chars().take(Self::PREVIEW_CHARS).collect(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_serializes_as_ordered_map() {
        let row = Row::new()
            .with("zeta", Value::Int(1))
            .with("alpha", Value::Text("a".to_string()));
        let json = serde_json::to_string(&row).expect("should serialize");
        assert_eq!(json, r#"{"zeta":1,"alpha":"a"}"#);
    }

    #[test]
    fn filters_deserialize_from_wire_operators() {
        let json = r#"[
            {"column":"name","operator":"ILIKE","value":"%ann%"},
            {"column":"deleted_at","operator":"IS NULL"}
        ]"#;
        let filters: Vec<DataFilter> = serde_json::from_str(json).expect("should parse");
        assert_eq!(filters[0].operator, FilterOperator::ILike);
        assert_eq!(filters[0].value, Some(Value::Text("%ann%".to_string())));
        assert_eq!(filters[1].operator, FilterOperator::IsNull);
        assert!(filters[1].value.is_none());
    }

    #[test]
    fn row_data_deserializes_from_plain_object() {
        let data: RowData =
            serde_json::from_str(r#"{"name":"Ann","age":31,"meta":{"a":1}}"#).expect("should parse");
        assert_eq!(data.columns.get("age"), Some(&Value::Int(31)));
        assert!(matches!(data.columns.get("meta"), Some(Value::Json(_))));
    }

    #[test]
    fn config_never_serializes_password() {
        let config = DatabaseConfig {
            name: "main".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "app".to_string(),
            password: "secret".to_string(),
            database: "app".to_string(),
            engine: EngineKind::Postgres,
            source: ConfigSource::Static,
            ssl: false,
            read_only: false,
        };
        let json = serde_json::to_string(&config).expect("should serialize");
        assert!(!json.contains("secret"));
    }

    #[test]
    fn constraint_kind_uses_single_letter_codes() {
        assert_eq!(
            serde_json::to_string(&ConstraintKind::ForeignKey).expect("should serialize"),
            "\"f\""
        );
        assert_eq!(ConstraintKind::from_code("x"), Some(ConstraintKind::Exclusion));
    }

    #[test]
    fn import_report_truncates_statement_preview() {
        let mut report = ImportReport::default();
        report.record_failure(2, &"x".repeat(500), "boom");
        assert_eq!(report.errors[0].statement.len(), 200);
        assert_eq!(report.statements_failed, 1);
    }
}
