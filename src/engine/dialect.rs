//! SQL dialects
//!
//! Everything that differs in how PostgreSQL and MySQL/MariaDB spell a
//! statement lives here: identifier and literal quoting, placeholder style,
//! text casts and the pieces of DDL the dump generator needs. Drivers hand
//! out their dialect, so callers never branch on the engine.

use std::fmt::Write;

use crate::engine::types::{ColumnInfo, Value};

pub trait Dialect: Send + Sync {
    /// Wraps and escapes an identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Inverse of `quote_ident`. Unquoted input is returned as-is.
    fn unquote_ident(&self, quoted: &str) -> String;

    /// Renders a value as a literal safe to embed in a statement.
    fn quote_literal(&self, value: &Value) -> String;

    /// Schema-qualified table reference.
    fn qualify(&self, schema: &str, table: &str) -> String;

    /// Positional parameter marker, 1-based.
    fn placeholder(&self, index: usize) -> String;

    /// Parameter marker coerced to the target column type when the engine
    /// needs it.
    fn typed_placeholder(&self, index: usize, column_type: Option<&str>) -> String {
        let _ = column_type;
        self.placeholder(index)
    }

    /// Casts an expression to the engine's text type.
    fn text_cast(&self, expr: &str) -> String;

    /// Case-insensitive pattern match of `expr` against `param`.
    fn case_insensitive_like(&self, expr: &str, param: &str) -> String;

    /// Whether a backslash escapes the next character inside string literals.
    fn backslash_escapes(&self) -> bool;

    /// Column definition for CREATE TABLE: name, type, nullability, default.
    fn column_definition(&self, column: &ColumnInfo) -> String;

    /// Select-list expression used when dumping a column's data.
    fn dump_select_expr(&self, column: &ColumnInfo) -> String;

    /// Statements emitted before the first table of a dump.
    fn dump_preamble(&self) -> &'static [&'static str];

    /// Statements emitted after the last table of a dump.
    fn dump_postamble(&self) -> &'static [&'static str];

    /// Statement resynchronising an auto-increment source after explicit
    /// inserts, if the engine needs one.
    fn sequence_reset(&self, schema: &str, table: &str, column: &ColumnInfo) -> Option<String> {
        let _ = (schema, table, column);
        None
    }
}

fn quote_with(name: &str, quote: char) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(quote);
    for ch in name.chars() {
        if ch == quote {
            out.push(quote);
        }
        out.push(ch);
    }
    out.push(quote);
    out
}

fn unquote_with(quoted: &str, quote: char) -> String {
    let inner = quoted
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote));
    match inner {
        Some(inner) => {
            let doubled: String = [quote, quote].iter().collect();
            inner.replace(&doubled, &quote.to_string())
        }
        None => quoted.to_string(),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Lowercased type name without length/precision or modifiers.
fn base_type(engine_type: &str) -> String {
    let lowered = engine_type.trim().to_ascii_lowercase();
    let head = lowered.split('(').next().unwrap_or("");
    head.split_whitespace().next().unwrap_or("").to_string()
}

/// PostgreSQL (and Supabase)
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// `udt_name`s the postgres row decoder maps onto typed values.
    const NATIVE_TYPES: &'static [&'static str] = &[
        "int2", "int4", "int8", "float4", "float8", "numeric", "bool", "text", "varchar",
        "bpchar", "name", "timestamp", "timestamptz", "date", "time", "bytea", "json", "jsonb",
        "uuid", "_text", "_varchar", "_int4", "_int8",
    ];

    fn quote_text(text: &str) -> String {
        quote_with(text, '\'')
    }

    fn is_serial(column: &ColumnInfo) -> bool {
        column
            .default_value
            .as_deref()
            .map(|d| d.starts_with("nextval("))
            .unwrap_or(false)
    }

    fn column_type(&self, column: &ColumnInfo) -> String {
        let data_type = column.data_type.as_str();
        if Self::is_serial(column) {
            match data_type {
                "integer" => return "serial".to_string(),
                "bigint" => return "bigserial".to_string(),
                "smallint" => return "smallserial".to_string(),
                _ => {}
            }
        }

        match data_type {
            "ARRAY" => {
                let element = column
                    .engine_type
                    .strip_prefix('_')
                    .unwrap_or(&column.engine_type);
                format!("{}[]", element)
            }
            "USER-DEFINED" => self.quote_ident(&column.engine_type),
            "character varying" | "character" | "bit" | "bit varying" => {
                match column.max_length {
                    Some(len) => format!("{}({})", data_type, len),
                    None => data_type.to_string(),
                }
            }
            "numeric" => match (column.numeric_precision, column.numeric_scale) {
                (Some(p), Some(s)) => format!("numeric({}, {})", p, s),
                (Some(p), None) => format!("numeric({})", p),
                _ => "numeric".to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl Dialect for PostgresDialect {
    fn quote_ident(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn unquote_ident(&self, quoted: &str) -> String {
        unquote_with(quoted, '"')
    }

    fn quote_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    (if *f > 0.0 { "'Infinity'" } else { "'-Infinity'" }).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => Self::quote_text(s),
            Value::Json(j) => Self::quote_text(&j.to_string()),
            Value::Array(items) => {
                if items.is_empty() {
                    "'{}'".to_string()
                } else {
                    let inner: Vec<String> = items.iter().map(|v| self.quote_literal(v)).collect();
                    format!("ARRAY[{}]", inner.join(", "))
                }
            }
            Value::Timestamp(ts) => {
                Self::quote_text(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            Value::TimestampTz(ts) => Self::quote_text(&ts.to_rfc3339()),
            Value::Date(d) => Self::quote_text(&d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Self::quote_text(&t.format("%H:%M:%S%.f").to_string()),
            Value::Bytes(b) => format!("'\\x{}'::bytea", hex(b)),
        }
    }

    fn qualify(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn typed_placeholder(&self, index: usize, column_type: Option<&str>) -> String {
        match column_type {
            Some(ty) => format!("CAST(${} AS {})", index, ty),
            None => self.placeholder(index),
        }
    }

    fn text_cast(&self, expr: &str) -> String {
        format!("CAST({} AS TEXT)", expr)
    }

    fn case_insensitive_like(&self, expr: &str, param: &str) -> String {
        format!("{} ILIKE {}", self.text_cast(expr), param)
    }

    fn backslash_escapes(&self) -> bool {
        false
    }

    fn column_definition(&self, column: &ColumnInfo) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), self.column_type(column));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if Self::is_serial(column) {
            return def;
        }
        if column.is_auto_increment {
            def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        } else if let Some(default) = &column.default_value {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    fn dump_select_expr(&self, column: &ColumnInfo) -> String {
        let quoted = self.quote_ident(&column.name);
        if Self::NATIVE_TYPES.contains(&column.engine_type.as_str()) {
            quoted
        } else {
            format!("{} AS {}", self.text_cast(&quoted), quoted)
        }
    }

    fn dump_preamble(&self) -> &'static [&'static str] {
        &["SET client_encoding = 'UTF8';", "BEGIN;"]
    }

    fn dump_postamble(&self) -> &'static [&'static str] {
        &["COMMIT;"]
    }

    fn sequence_reset(&self, schema: &str, table: &str, column: &ColumnInfo) -> Option<String> {
        if !Self::is_serial(column) && !column.is_auto_increment {
            return None;
        }
        let qualified = self.qualify(schema, table);
        let col = self.quote_ident(&column.name);
        Some(format!(
            "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false);",
            Self::quote_text(&qualified),
            Self::quote_text(&column.name),
            col,
            qualified
        ))
    }
}

/// MySQL and MariaDB
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    const NATIVE_TYPES: &'static [&'static str] = &[
        "tinyint", "smallint", "mediumint", "int", "integer", "bigint", "float", "double",
        "decimal", "varchar", "char", "text", "tinytext", "mediumtext", "longtext", "date",
        "datetime", "timestamp", "time", "blob", "tinyblob", "mediumblob", "longblob", "binary",
        "varbinary", "json",
    ];

    fn quote_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('\'');
        for ch in text.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                other => out.push(other),
            }
        }
        out.push('\'');
        out
    }

    /// COLUMN_DEFAULT is unquoted on MySQL 8 and quoted on MariaDB.
    fn default_sql(default: &str) -> String {
        let upper = default.to_ascii_uppercase();
        if upper == "NULL"
            || upper.starts_with("CURRENT_TIMESTAMP")
            || upper.starts_with("NOW(")
            || default.starts_with('\'')
            || default.starts_with("b'")
            || default.starts_with('(')
            || default.parse::<f64>().is_ok()
        {
            default.to_string()
        } else {
            Self::quote_text(default)
        }
    }
}

impl Dialect for MySqlDialect {
    fn quote_ident(&self, name: &str) -> String {
        quote_with(name, '`')
    }

    fn unquote_ident(&self, quoted: &str) -> String {
        unquote_with(quoted, '`')
    }

    fn quote_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() {
                    f.to_string()
                } else {
                    "NULL".to_string()
                }
            }
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => Self::quote_text(s),
            Value::Json(j) => Self::quote_text(&j.to_string()),
            Value::Array(items) => {
                let json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
                Self::quote_text(&json)
            }
            Value::Timestamp(ts) => {
                Self::quote_text(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            Value::TimestampTz(ts) => Self::quote_text(
                &ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            ),
            Value::Date(d) => Self::quote_text(&d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Self::quote_text(&t.format("%H:%M:%S%.f").to_string()),
            Value::Bytes(b) => format!("X'{}'", hex(b)),
        }
    }

    /// MySQL sessions are bound to one database; the schema is ignored.
    fn qualify(&self, _schema: &str, table: &str) -> String {
        self.quote_ident(table)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn text_cast(&self, expr: &str) -> String {
        format!("CAST({} AS CHAR)", expr)
    }

    fn case_insensitive_like(&self, expr: &str, param: &str) -> String {
        format!("LOWER({}) LIKE LOWER({})", self.text_cast(expr), param)
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn column_definition(&self, column: &ColumnInfo) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), column.engine_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            def.push_str(" DEFAULT ");
            def.push_str(&Self::default_sql(default));
        }
        if column.is_auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        def
    }

    fn dump_select_expr(&self, column: &ColumnInfo) -> String {
        let quoted = self.quote_ident(&column.name);
        if Self::NATIVE_TYPES.contains(&base_type(&column.engine_type).as_str()) {
            quoted
        } else {
            format!("{} AS {}", self.text_cast(&quoted), quoted)
        }
    }

    fn dump_preamble(&self) -> &'static [&'static str] {
        &["SET NAMES utf8mb4;", "SET FOREIGN_KEY_CHECKS = 0;"]
    }

    fn dump_postamble(&self) -> &'static [&'static str] {
        &["SET FOREIGN_KEY_CHECKS = 1;"]
    }
}
