//! Core Database Backend Traits
//!
//! Defines the scalar value model shared by every layer, the row type the
//! adapter hands back, the SQL dialect switches, and the traits a driver has
//! to implement. Drivers receive SQL whose placeholders are already in the
//! backend's positional form.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::backends::DatabaseBackendType;
use crate::config::ConnectionConfig;
use crate::error::{OrmError, OrmResult};

/// Canonical SQL rendering of a timestamp value
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical SQL rendering of a date value
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and report affected rows and the generated key, if any
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecuteResult>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>>;

    /// Close the connection
    async fn close(&mut self) -> OrmResult<()>;
}

/// Creates physical connections for one adapter kind
#[async_trait]
pub trait Connector: Send + Sync {
    /// Adapter kind served by this connector
    fn backend_type(&self) -> DatabaseBackendType;

    /// Open a physical connection for the given configuration
    async fn connect(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn DatabaseConnection>>;
}

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<DatabaseValue>,
}

/// A result row: column name to value, in select-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: IndexMap<String, DatabaseValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insertion, mostly for tests and scripted drivers
    pub fn with<V: Into<DatabaseValue>>(mut self, column: &str, value: V) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, column: &str, value: DatabaseValue) {
        self.columns.insert(column.to_string(), value);
    }

    /// Get a column value by name
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns.get(column)
    }

    /// Get a column value by position
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get_index(index).map(|(_, value)| value)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DatabaseValue)> {
        self.columns.iter()
    }

    pub fn into_map(self) -> IndexMap<String, DatabaseValue> {
        self.columns
    }

    /// Convert row to a JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

impl FromIterator<(String, DatabaseValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, DatabaseValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Scalar value exchanged with the database
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Null, empty string, zero and "0" count as empty
    pub fn is_empty(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Bool(b) => !b,
            DatabaseValue::Int32(i) => *i == 0,
            DatabaseValue::Int64(i) => *i == 0,
            DatabaseValue::Float64(f) => *f == 0.0,
            DatabaseValue::String(s) => s.is_empty() || s == "0",
            DatabaseValue::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DatabaseValue::Int32(_) | DatabaseValue::Int64(_) | DatabaseValue::Float64(_)
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as f64),
            DatabaseValue::Int64(i) => Some(*i as f64),
            DatabaseValue::Float64(f) => Some(*f),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(b) => Some(*b),
            DatabaseValue::Int32(i) => Some(*i != 0),
            DatabaseValue::Int64(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Stable textual key used by identity maps and result indexing
    pub fn key_string(&self) -> String {
        match self {
            DatabaseValue::Null => String::new(),
            DatabaseValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::Timestamp(ts) => JsonValue::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            DatabaseValue::Date(d) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create DatabaseValue from JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            other => DatabaseValue::Json(other),
        }
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => write!(f, "NULL"),
            DatabaseValue::Bool(b) => write!(f, "{}", b),
            DatabaseValue::Int32(i) => write!(f, "{}", i),
            DatabaseValue::Int64(i) => write!(f, "{}", i),
            DatabaseValue::Float64(v) => write!(f, "{}", v),
            DatabaseValue::String(s) => write!(f, "{}", s),
            DatabaseValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            DatabaseValue::Uuid(u) => write!(f, "{}", u),
            DatabaseValue::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            DatabaseValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            DatabaseValue::Time(t) => write!(f, "{}", t),
            DatabaseValue::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<u32> for DatabaseValue {
    fn from(value: u32) -> Self {
        DatabaseValue::Int64(value as i64)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<&String> for DatabaseValue {
    fn from(value: &String) -> Self {
        DatabaseValue::String(value.clone())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

impl From<NaiveDate> for DatabaseValue {
    fn from(value: NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<NaiveTime> for DatabaseValue {
    fn from(value: NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::from_json(value)
    }
}

impl From<&DatabaseValue> for DatabaseValue {
    fn from(value: &DatabaseValue) -> Self {
        value.clone()
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL => '"',
            SqlDialect::MySQL => '`',
            SqlDialect::SQLite => '"',
        }
    }

    /// Literal used when a boolean is rendered inline
    pub fn boolean_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (SqlDialect::PostgreSQL, true) => "TRUE",
            (SqlDialect::PostgreSQL, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Get the current timestamp function for this dialect
    pub fn current_timestamp(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::MySQL => "NOW()",
            SqlDialect::SQLite => "CURRENT_TIMESTAMP",
        }
    }

    /// Column definition for an auto-increment surrogate key
    pub fn auto_increment_key(&self, column: &str) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("{} SERIAL PRIMARY KEY", column),
            SqlDialect::MySQL => format!("{} INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY", column),
            SqlDialect::SQLite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column),
        }
    }

    /// Whether generated keys are read back through `RETURNING`
    pub fn supports_returning(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Keyword inserted after `INSERT` to skip duplicate rows
    pub fn insert_ignore_keyword(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "",
            SqlDialect::MySQL => " IGNORE",
            SqlDialect::SQLite => " OR IGNORE",
        }
    }

    /// Whether the driver error describes a missing table
    pub fn is_missing_table(&self, code: &str, message: &str) -> bool {
        match self {
            SqlDialect::PostgreSQL => code == "42P01",
            SqlDialect::MySQL => code == "1146" || code == "42S02",
            SqlDialect::SQLite => message.contains("no such table"),
        }
    }

    /// Rewrite named placeholders (`:name`) into the positional form of this dialect.
    ///
    /// Quoted literals and quoted identifiers are copied untouched and `::`
    /// casts are not placeholders. Every occurrence consumes one parameter, so
    /// the returned count must equal the parameter list length.
    pub fn to_positional(&self, sql: &str) -> (String, usize) {
        let chars: Vec<char> = sql.chars().collect();
        let mut out = String::with_capacity(sql.len());
        let mut count = 0;
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = quote {
                out.push(c);
                if c == q {
                    // doubled quote characters stay inside the literal
                    if i + 1 < chars.len() && chars[i + 1] == q {
                        out.push(q);
                        i += 1;
                    } else {
                        quote = None;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                    i += 1;
                }
                ':' if i + 1 < chars.len() && chars[i + 1] == ':' => {
                    out.push_str("::");
                    i += 2;
                }
                ':' if i + 1 < chars.len()
                    && (chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_') =>
                {
                    let mut end = i + 1;
                    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    out.push_str(&self.parameter_placeholder(count));
                    count += 1;
                    i = end;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        (out, count)
    }
}

/// Ensure a positional statement received exactly as many parameters as it has placeholders
pub fn check_parameter_count(sql: &str, expected: usize, given: usize) -> OrmResult<()> {
    if expected != given {
        return Err(OrmError::InvalidArgument(format!(
            "statement has {} placeholders but {} parameters were bound: {}",
            expected, given, sql
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_rewrite_postgres() {
        let (sql, count) = SqlDialect::PostgreSQL
            .to_positional("SELECT * FROM orders WHERE (orders.status = :status1) AND (orders.id > :id1)");
        assert_eq!(sql, "SELECT * FROM orders WHERE (orders.status = $1) AND (orders.id > $2)");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_positional_rewrite_skips_literals_and_casts() {
        let (sql, count) = SqlDialect::MySQL
            .to_positional("SELECT ':not' AS a, \"x:y\" FROM t WHERE t.a = :a1 AND t.b::text = 'it''s :x'");
        assert_eq!(
            sql,
            "SELECT ':not' AS a, \"x:y\" FROM t WHERE t.a = ? AND t.b::text = 'it''s :x'"
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_empty_values() {
        assert!(DatabaseValue::Null.is_empty());
        assert!(DatabaseValue::Int64(0).is_empty());
        assert!(DatabaseValue::from("0").is_empty());
        assert!(DatabaseValue::from("").is_empty());
        assert!(!DatabaseValue::Int64(7).is_empty());
    }

    #[test]
    fn test_row_access() {
        let row = Row::new().with("id", 3i64).with("name", "Acme");
        assert_eq!(row.get("name"), Some(&DatabaseValue::from("Acme")));
        assert_eq!(row.get_by_index(0), Some(&DatabaseValue::Int64(3)));
        assert_eq!(row.column_names(), vec!["id".to_string(), "name".to_string()]);
        assert_eq!(row.to_json()["name"], "Acme");
    }
}
