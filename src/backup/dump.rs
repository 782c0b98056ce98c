//! Dump generator
//!
//! Walks the catalog through the driver and writes a replayable SQL text:
//! tables are dropped and recreated with their key, unique and check
//! constraints, rows follow as one INSERT each. Sequence resets, secondary
//! indexes and foreign keys come after all data so insert order never trips
//! a constraint.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::engine::dialect::Dialect;
use crate::engine::error::EngineResult;
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, ConstraintInfo, ConstraintKind, IndexInfo, Row, TableInfo, TableStructure, Value,
};

/// Rows dumped per table when no limit is configured
pub const DEFAULT_ROW_LIMIT: usize = 50_000;

#[derive(Debug, Clone, Serialize)]
pub struct DumpOutput {
    pub file_name: String,
    pub sql: String,
    /// Number of tables dumped
    pub tables: usize,
    /// Number of INSERT statements written
    pub rows: u64,
    /// Tables with more rows than the limit
    pub truncated_tables: Vec<String>,
}

pub struct DumpGenerator<'a> {
    driver: &'a dyn DatabaseDriver,
    schema: String,
    row_limit: usize,
    only_tables: Option<Vec<String>>,
}

/// Statements collected while walking tables, written after all data.
#[derive(Default)]
struct Deferred {
    sequences: Vec<String>,
    indexes: Vec<String>,
    foreign_keys: Vec<String>,
}

impl<'a> DumpGenerator<'a> {
    pub fn new(driver: &'a dyn DatabaseDriver, schema: impl Into<String>) -> Self {
        Self {
            driver,
            schema: schema.into(),
            row_limit: DEFAULT_ROW_LIMIT,
            only_tables: None,
        }
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = limit;
        self
    }

    /// Restricts the dump to the named tables, keeping catalog order.
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.only_tables = Some(tables);
        self
    }

    #[instrument(skip(self), fields(database = %self.driver.name(), schema = %self.schema))]
    pub async fn generate(&self) -> EngineResult<DumpOutput> {
        let dialect = self.driver.dialect();
        let tables: Vec<TableInfo> = self
            .driver
            .list_tables(&self.schema)
            .await?
            .into_iter()
            .filter(|t| {
                self.only_tables
                    .as_ref()
                    .map(|only| only.iter().any(|name| name == &t.name))
                    .unwrap_or(true)
            })
            .collect();

        let generated_at = Utc::now();
        let mut sql = String::new();
        sql.push_str("-- dbdeck dump\n");
        sql.push_str(&format!(
            "-- Database: {} ({})\n",
            self.driver.name(),
            self.driver.engine()
        ));
        sql.push_str(&format!("-- Generated: {}\n\n", generated_at.to_rfc3339()));

        for line in dialect.dump_preamble() {
            sql.push_str(line);
            sql.push('\n');
        }
        sql.push('\n');

        let mut deferred = Deferred::default();
        let mut total_rows = 0u64;
        let mut truncated_tables = Vec::new();

        for table in &tables {
            let structure = self
                .driver
                .get_table_structure(&self.schema, &table.name)
                .await?;
            let qualified = dialect.qualify(&self.schema, &table.name);

            sql.push_str(&format!("-- Table: {}\n", table.name));
            sql.push_str(&format!("DROP TABLE IF EXISTS {} CASCADE;\n", qualified));
            sql.push_str(&create_table_sql(dialect, &qualified, &structure));
            sql.push('\n');

            let (rows, truncated) = self.table_rows(dialect, &qualified, &structure).await?;
            if truncated {
                warn!(table = %table.name, limit = self.row_limit, "Table truncated in dump");
                truncated_tables.push(table.name.clone());
            }
            for row in &rows {
                sql.push_str(&insert_sql(dialect, &qualified, &structure.columns, row));
                sql.push('\n');
            }
            total_rows += rows.len() as u64;
            sql.push('\n');

            self.defer_table(dialect, &table.name, &qualified, &structure, &mut deferred);
        }

        for statement in deferred
            .sequences
            .iter()
            .chain(&deferred.indexes)
            .chain(&deferred.foreign_keys)
        {
            sql.push_str(statement);
            sql.push('\n');
        }

        for line in dialect.dump_postamble() {
            sql.push_str(line);
            sql.push('\n');
        }

        info!(tables = tables.len(), rows = total_rows, "Dump generated");

        Ok(DumpOutput {
            file_name: dump_file_name(self.driver.name(), &generated_at.format("%Y%m%d_%H%M%S").to_string()),
            sql,
            tables: tables.len(),
            rows: total_rows,
            truncated_tables,
        })
    }

    /// Reads up to the row limit, ordered by primary key when there is one.
    async fn table_rows(
        &self,
        dialect: &dyn Dialect,
        qualified: &str,
        structure: &TableStructure,
    ) -> EngineResult<(Vec<Row>, bool)> {
        if structure.columns.is_empty() {
            return Ok((Vec::new(), false));
        }

        let select_list: Vec<String> = structure
            .columns
            .iter()
            .map(|c| dialect.dump_select_expr(c))
            .collect();
        let mut select = format!("SELECT {} FROM {}", select_list.join(", "), qualified);
        if let Some(pk) = structure.primary_key() {
            let order: Vec<String> = pk.columns.iter().map(|c| dialect.quote_ident(c)).collect();
            if !order.is_empty() {
                select.push_str(&format!(" ORDER BY {}", order.join(", ")));
            }
        }
        select.push_str(&format!(" LIMIT {}", self.row_limit.saturating_add(1)));

        let mut rows = self.driver.query(&select, &[]).await?.rows;
        let truncated = rows.len() > self.row_limit;
        rows.truncate(self.row_limit);
        Ok((rows, truncated))
    }

    fn defer_table(
        &self,
        dialect: &dyn Dialect,
        table: &str,
        qualified: &str,
        structure: &TableStructure,
        deferred: &mut Deferred,
    ) {
        deferred.sequences.extend(
            structure
                .columns
                .iter()
                .filter_map(|c| dialect.sequence_reset(&self.schema, table, c)),
        );

        deferred.indexes.extend(
            structure
                .indexes
                .iter()
                .filter(|i| !i.is_primary)
                .filter(|i| !structure.constraints.iter().any(|c| c.name == i.name))
                .map(|i| index_sql(dialect, qualified, i)),
        );

        deferred.foreign_keys.extend(
            structure
                .constraints
                .iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
                .filter_map(|c| self.foreign_key_sql(dialect, qualified, c)),
        );
    }

    fn foreign_key_sql(
        &self,
        dialect: &dyn Dialect,
        qualified: &str,
        constraint: &ConstraintInfo,
    ) -> Option<String> {
        let body = match (&constraint.definition, &constraint.references) {
            (Some(definition), _) => definition.clone(),
            (None, Some(target)) => {
                let schema = target.schema.as_deref().unwrap_or(&self.schema);
                format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    quoted_list(dialect, &constraint.columns),
                    dialect.qualify(schema, &target.table),
                    quoted_list(dialect, &target.columns)
                )
            }
            (None, None) => return None,
        };
        Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            qualified,
            dialect.quote_ident(&constraint.name),
            body
        ))
    }
}

fn quoted_list(dialect: &dyn Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// CREATE TABLE with primary key, unique, check and exclusion constraints
/// inlined after the columns. The primary key keeps the engine's default name.
fn create_table_sql(dialect: &dyn Dialect, qualified: &str, structure: &TableStructure) -> String {
    let mut parts: Vec<String> = structure
        .columns
        .iter()
        .map(|c| dialect.column_definition(c))
        .collect();

    if let Some(pk) = structure.primary_key() {
        parts.push(format!("PRIMARY KEY ({})", quoted_list(dialect, &pk.columns)));
    }

    for constraint in &structure.constraints {
        let body = match constraint.kind {
            ConstraintKind::Unique => {
                format!("UNIQUE ({})", quoted_list(dialect, &constraint.columns))
            }
            ConstraintKind::Check | ConstraintKind::Exclusion => match &constraint.definition {
                Some(definition) => definition.clone(),
                None => continue,
            },
            ConstraintKind::PrimaryKey | ConstraintKind::ForeignKey => continue,
        };
        parts.push(format!(
            "CONSTRAINT {} {}",
            dialect.quote_ident(&constraint.name),
            body
        ));
    }

    format!("CREATE TABLE {} (\n    {}\n);", qualified, parts.join(",\n    "))
}

fn insert_sql(dialect: &dyn Dialect, qualified: &str, columns: &[ColumnInfo], row: &Row) -> String {
    let names: Vec<String> = columns.iter().map(|c| dialect.quote_ident(&c.name)).collect();
    let values: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_literal(row.get(&c.name).unwrap_or(&Value::Null)))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        qualified,
        names.join(", "),
        values.join(", ")
    )
}

fn index_sql(dialect: &dyn Dialect, qualified: &str, index: &IndexInfo) -> String {
    if let Some(definition) = &index.definition {
        return format!("{};", definition.trim_end_matches(';'));
    }
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.is_unique { "UNIQUE " } else { "" },
        dialect.quote_ident(&index.name),
        qualified,
        quoted_list(dialect, &index.columns)
    )
}

fn dump_file_name(database: &str, stamp: &str) -> String {
    let safe: String = database
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}.sql", safe, stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::splitter::SqlSplitter;
    use crate::engine::testing::{column, index, primary_key, FakeDriver};
    use crate::engine::types::{EngineKind, ForeignKeyTarget};

    fn users() -> TableStructure {
        let mut id = column("id", "integer", "int4");
        id.nullable = false;
        id.is_primary_key = true;
        id.default_value = Some("nextval('users_id_seq'::regclass)".to_string());
        TableStructure {
            columns: vec![id, column("email", "text", "text")],
            constraints: vec![
                primary_key("users_pkey", &["id"]),
                ConstraintInfo {
                    name: "users_email_key".to_string(),
                    kind: ConstraintKind::Unique,
                    columns: vec!["email".to_string()],
                    references: None,
                    definition: Some("UNIQUE (email)".to_string()),
                },
            ],
            indexes: vec![index("users_email_key", &["email"], true), index("users_email_lower", &["email"], false)],
        }
    }

    fn orders() -> TableStructure {
        let mut id = column("id", "integer", "int4");
        id.nullable = false;
        TableStructure {
            columns: vec![id, column("user_id", "integer", "int4"), column("total", "numeric", "numeric")],
            constraints: vec![
                primary_key("orders_pkey", &["id"]),
                ConstraintInfo {
                    name: "orders_user_fk".to_string(),
                    kind: ConstraintKind::ForeignKey,
                    columns: vec!["user_id".to_string()],
                    references: Some(ForeignKeyTarget {
                        schema: Some("public".to_string()),
                        table: "users".to_string(),
                        columns: vec!["id".to_string()],
                    }),
                    definition: None,
                },
                ConstraintInfo {
                    name: "orders_total_check".to_string(),
                    kind: ConstraintKind::Check,
                    columns: vec!["total".to_string()],
                    references: None,
                    definition: Some("CHECK ((total >= 0))".to_string()),
                },
            ],
            indexes: Vec::new(),
        }
    }

    fn user_rows(count: i64) -> Vec<Row> {
        (1..=count)
            .map(|i| {
                Row::new()
                    .with("id", Value::Int(i))
                    .with("email", Value::Text(format!("user{}@o'hara.test", i)))
            })
            .collect()
    }

    fn postgres_fake() -> FakeDriver {
        FakeDriver::new("main", EngineKind::Postgres)
            .with_table("public", "users", users(), user_rows(3))
            .with_table(
                "public",
                "orders",
                orders(),
                vec![Row::new()
                    .with("id", Value::Int(1))
                    .with("user_id", Value::Int(1))
                    .with("total", Value::Null)],
            )
    }

    #[tokio::test]
    async fn dump_orders_ddl_data_then_constraints() {
        let driver = postgres_fake();
        let dump = DumpGenerator::new(&driver, "public")
            .generate()
            .await
            .expect("dump should succeed");

        assert_eq!(dump.tables, 2);
        assert_eq!(dump.rows, 4);
        assert!(dump.truncated_tables.is_empty());
        assert!(dump.file_name.starts_with("main_") && dump.file_name.ends_with(".sql"));
        assert!(dump.sql.starts_with("-- dbdeck dump\n-- Database: main (postgres)\n"));

        let sql = &dump.sql;
        let position = |needle: &str| {
            sql.find(needle)
                .unwrap_or_else(|| panic!("missing {:?} in dump:\n{}", needle, sql))
        };

        assert!(position("BEGIN;") < position("DROP TABLE IF EXISTS \"public\".\"users\" CASCADE;"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
        assert!(sql.contains("CONSTRAINT \"users_email_key\" UNIQUE (\"email\")"));
        assert!(sql.contains("CONSTRAINT \"orders_total_check\" CHECK ((total >= 0))"));
        assert!(sql.contains("'user1@o''hara.test'"));
        assert!(driver
            .executed()
            .iter()
            .any(|s| s.contains("FROM \"public\".\"users\" ORDER BY \"id\"")));

        let last_insert = sql.rfind("INSERT INTO").expect("inserts present");
        let fk = position("ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"orders_user_fk\" FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\");");
        let setval = position("SELECT setval(pg_get_serial_sequence(");
        let idx = position("CREATE INDEX \"users_email_lower\"");
        assert!(last_insert < setval && setval < idx && idx < fk);
        assert!(fk < position("COMMIT;"));

        assert!(!sql.contains("CREATE UNIQUE INDEX \"users_email_key\""));
    }

    #[tokio::test]
    async fn row_limit_marks_tables_truncated() {
        let driver = FakeDriver::new("main", EngineKind::Postgres)
            .with_table("public", "users", users(), user_rows(5));
        let dump = DumpGenerator::new(&driver, "public")
            .with_row_limit(2)
            .generate()
            .await
            .expect("dump should succeed");

        assert_eq!(dump.rows, 2);
        assert_eq!(dump.truncated_tables, vec!["users".to_string()]);
        assert_eq!(dump.sql.matches("INSERT INTO").count(), 2);
        assert!(driver.executed().iter().any(|s| s.ends_with("LIMIT 3")));
    }

    #[tokio::test]
    async fn mysql_dump_toggles_foreign_key_checks() {
        let mut id = column("id", "int", "int(11)");
        id.nullable = false;
        id.is_auto_increment = true;
        let structure = TableStructure {
            columns: vec![id, column("note", "varchar", "varchar(20)")],
            constraints: vec![primary_key("PRIMARY", &["id"])],
            indexes: vec![IndexInfo {
                is_primary: true,
                ..index("PRIMARY", &["id"], true)
            }],
        };
        let driver = FakeDriver::new("legacy", EngineKind::Mysql).with_table(
            "shop",
            "notes",
            structure,
            vec![Row::new()
                .with("id", Value::Int(7))
                .with("note", Value::Text(r"back\slash".to_string()))],
        );

        let dump = DumpGenerator::new(&driver, "ignored")
            .generate()
            .await
            .expect("dump should succeed");

        let sql = &dump.sql;
        assert!(sql.contains("SET FOREIGN_KEY_CHECKS = 0;"));
        assert!(sql.trim_end().ends_with("SET FOREIGN_KEY_CHECKS = 1;"));
        assert!(sql.contains("`id` int(11) NOT NULL AUTO_INCREMENT"));
        assert!(sql.contains(r"INSERT INTO `notes` (`id`, `note`) VALUES (7, 'back\\slash');"));
        assert!(!sql.contains("BEGIN;"));
        assert!(!sql.contains("CREATE UNIQUE INDEX"));
    }

    #[tokio::test]
    async fn dump_replays_through_the_splitter() {
        let source = postgres_fake();
        let dump = DumpGenerator::new(&source, "public")
            .generate()
            .await
            .expect("dump should succeed");

        let target = FakeDriver::new("restore", EngineKind::Postgres);
        let mut statements = SqlSplitter::new(&dump.sql);
        let report = target
            .execute_script(&mut statements)
            .await
            .expect("replay should run");

        assert_eq!(report.statements_failed, 0);
        let replayed = target.executed();
        let inserts_into = |table: &str| {
            replayed
                .iter()
                .filter(|s| s.starts_with(&format!("INSERT INTO \"public\".\"{}\"", table)))
                .count()
        };
        assert_eq!(inserts_into("users"), source.rows_of("users").len());
        assert_eq!(inserts_into("orders"), source.rows_of("orders").len());

        let create_users = replayed
            .iter()
            .find(|s| s.starts_with("CREATE TABLE \"public\".\"users\""))
            .expect("users recreated");
        for col in users().columns {
            assert!(create_users.contains(&format!("\"{}\"", col.name)));
        }
        assert_eq!(replayed.first().map(String::as_str), Some("SET client_encoding = 'UTF8'"));
        assert_eq!(replayed.last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn file_names_are_filesystem_safe() {
        assert_eq!(dump_file_name("my db/prod", "20260101_000000"), "my_db_prod_20260101_000000.sql");
    }
}
