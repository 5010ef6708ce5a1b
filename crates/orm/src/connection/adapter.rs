//! Execution adapter
//!
//! Runs compiled queries on a named connection and provides the raw CRUD
//! primitives used by records: insert, update, delete, increment and a few
//! column-level DDL helpers. Every statement is built with named
//! placeholders and rewritten into the dialect's positional form just
//! before it is sent.

use indexmap::IndexMap;
use std::sync::Arc;

use super::registry::NamedConnection;
use crate::backends::{check_parameter_count, DatabaseValue, ExecuteResult, Row, SqlDialect};
use crate::conditions::{Condition, ConditionParser};
use crate::error::{OrmError, OrmResult};
use crate::security::{quote_identifier, quote_qualified, validate_identifier};
use crate::sql::{CompiledQuery, ParamSink};

/// Sentinel value rendered as the dialect's current-timestamp call
pub const NOW: &str = "NOW()";

/// Options of [`Adapter::insert`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOptions {
    /// Write NULL values instead of omitting their columns
    pub insert_nulls: bool,
    /// Skip rows that violate a unique constraint
    pub ignore_duplicates: bool,
    /// Columns overwritten when the row already exists
    pub upsert_columns: Vec<String>,
    /// Conflict target for PostgreSQL and SQLite upserts
    pub conflict_columns: Vec<String>,
    /// Column whose generated value is returned
    pub returning: Option<String>,
}

impl InsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_nulls(mut self) -> Self {
        self.insert_nulls = true;
        self
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.ignore_duplicates = true;
        self
    }

    pub fn upsert(mut self, columns: &[&str]) -> Self {
        self.upsert_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn on_conflict(mut self, columns: &[&str]) -> Self {
        self.conflict_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn returning(mut self, column: &str) -> Self {
        self.returning = Some(column.to_string());
        self
    }
}

/// Statement execution on one named connection
#[derive(Clone, Debug)]
pub struct Adapter {
    connection: Arc<NamedConnection>,
}

impl Adapter {
    pub fn new(connection: Arc<NamedConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<NamedConnection> {
        &self.connection
    }

    pub fn dialect(&self) -> SqlDialect {
        self.connection.dialect()
    }

    pub fn table_prefix(&self) -> &str {
        self.connection.table_prefix()
    }

    /// Run a query with named placeholders; `params` are in placeholder order
    pub async fn query(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let (positional, count) = self.dialect().to_positional(sql);
        check_parameter_count(&positional, count, params.len())?;
        tracing::debug!(
            connection = self.connection.name(),
            sql = positional.as_str(),
            params = params.len(),
            "query"
        );
        self.connection.fetch_all(&positional, params).await
    }

    /// Run a statement with named placeholders
    pub async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecuteResult> {
        let (positional, count) = self.dialect().to_positional(sql);
        check_parameter_count(&positional, count, params.len())?;
        tracing::debug!(
            connection = self.connection.name(),
            sql = positional.as_str(),
            params = params.len(),
            "execute"
        );
        self.connection.execute(&positional, params).await
    }

    pub async fn fetch(&self, compiled: &CompiledQuery) -> OrmResult<Vec<Row>> {
        self.query(&compiled.sql, &compiled.params()).await
    }

    /// Raw SQL where `?` marks take `bindings` in order
    pub async fn raw(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let mut sink = ParamSink::new();
        let sql = sink.expand_raw(sql, bindings)?;
        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();
        self.query(&sql, &params).await
    }

    /// Raw statement that returns no rows
    pub async fn raw_execute(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<ExecuteResult> {
        let mut sink = ParamSink::new();
        let sql = sink.expand_raw(sql, bindings)?;
        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();
        self.execute(&sql, &params).await
    }

    /// Insert one or more rows in a single statement.
    ///
    /// The column list comes from the first row (NULL columns dropped unless
    /// `insert_nulls`); later rows are expected to carry the same columns and
    /// missing ones are written as NULL. Returns the generated key when the
    /// driver reports one.
    pub async fn insert(
        &self,
        table: &str,
        rows: &[IndexMap<String, DatabaseValue>],
        options: &InsertOptions,
    ) -> OrmResult<Option<DatabaseValue>> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let dialect = self.dialect();
        let columns: Vec<&String> = first
            .iter()
            .filter(|(_, value)| options.insert_nulls || !value.is_null())
            .map(|(column, _)| column)
            .collect();

        let mut sink = ParamSink::new();
        let mut sql = format!(
            "INSERT{} INTO {}",
            if options.ignore_duplicates {
                dialect.insert_ignore_keyword()
            } else {
                ""
            },
            quote_qualified(table, dialect)
        );

        if columns.is_empty() {
            if rows.len() > 1 {
                return Err(OrmError::invalid_argument(
                    "Multi-row insert needs at least one non-null column",
                ));
            }
            sql.push_str(match dialect {
                SqlDialect::MySQL => " () VALUES ()",
                SqlDialect::PostgreSQL | SqlDialect::SQLite => " DEFAULT VALUES",
            });
        } else {
            let column_list = columns
                .iter()
                .map(|column| quote_identifier(column, dialect))
                .collect::<Vec<_>>()
                .join(", ");
            let tuples = rows
                .iter()
                .map(|row| {
                    let values = columns
                        .iter()
                        .map(|column| {
                            let value = row.get(column.as_str()).cloned().unwrap_or(DatabaseValue::Null);
                            render_value(column, value, dialect, &mut sink)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", values)
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ({}) VALUES {}", column_list, tuples));
        }

        sql.push_str(&self.conflict_clause(options)?);

        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();

        match (&options.returning, dialect.supports_returning()) {
            (Some(column), true) => {
                sql.push_str(&format!(" RETURNING {}", quote_identifier(column, dialect)));
                let rows = self.query(&sql, &params).await?;
                Ok(rows
                    .first()
                    .and_then(|row| row.get(column).cloned())
                    .filter(|value| !value.is_null()))
            }
            _ => {
                let result = self.execute(&sql, &params).await?;
                Ok(result.last_insert_id)
            }
        }
    }

    fn conflict_clause(&self, options: &InsertOptions) -> OrmResult<String> {
        let dialect = self.dialect();
        if options.upsert_columns.is_empty() {
            if options.ignore_duplicates && dialect == SqlDialect::PostgreSQL {
                return Ok(" ON CONFLICT DO NOTHING".to_string());
            }
            return Ok(String::new());
        }

        match dialect {
            SqlDialect::MySQL => {
                let updates = options
                    .upsert_columns
                    .iter()
                    .map(|column| {
                        let quoted = quote_identifier(column, dialect);
                        format!("{} = VALUES({})", quoted, quoted)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!(" ON DUPLICATE KEY UPDATE {}", updates))
            }
            SqlDialect::PostgreSQL | SqlDialect::SQLite => {
                let target: Vec<&String> = if options.conflict_columns.is_empty() {
                    options.returning.iter().collect()
                } else {
                    options.conflict_columns.iter().collect()
                };
                if target.is_empty() {
                    return Err(OrmError::invalid_argument(
                        "An upsert needs conflict columns on this backend",
                    ));
                }
                let target = target
                    .iter()
                    .map(|column| quote_identifier(column, dialect))
                    .collect::<Vec<_>>()
                    .join(", ");
                let updates = options
                    .upsert_columns
                    .iter()
                    .map(|column| {
                        let quoted = quote_identifier(column, dialect);
                        format!("{} = EXCLUDED.{}", quoted, quoted)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!(" ON CONFLICT ({}) DO UPDATE SET {}", target, updates))
            }
        }
    }

    /// Update matching rows with `values`.
    ///
    /// NULL values are skipped unless `update_nulls` is set. Returns the
    /// affected row count; nothing is executed when no column remains.
    pub async fn update(
        &self,
        table: &str,
        values: &IndexMap<String, DatabaseValue>,
        conditions: &[Condition],
        update_nulls: bool,
    ) -> OrmResult<u64> {
        let dialect = self.dialect();
        let mut sink = ParamSink::new();

        let assignments = values
            .iter()
            .filter(|(_, value)| update_nulls || !value.is_null())
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    quote_identifier(column, dialect),
                    render_value(column, value.clone(), dialect, &mut sink)
                )
            })
            .collect::<Vec<_>>();

        if assignments.is_empty() {
            tracing::debug!(table, "update skipped, no columns to write");
            return Ok(0);
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_qualified(table, dialect),
            assignments.join(", ")
        );
        self.push_where(&mut sql, conditions, &mut sink)?;

        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();
        Ok(self.execute(&sql, &params).await?.rows_affected)
    }

    /// Delete matching rows and return how many were removed
    pub async fn delete(&self, table: &str, conditions: &[Condition]) -> OrmResult<u64> {
        let mut sink = ParamSink::new();
        let mut sql = format!("DELETE FROM {}", quote_qualified(table, self.dialect()));
        self.push_where(&mut sql, conditions, &mut sink)?;

        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();
        Ok(self.execute(&sql, &params).await?.rows_affected)
    }

    /// `column = column + delta` for each entry; true when a row changed
    pub async fn increment(
        &self,
        table: &str,
        deltas: &IndexMap<String, DatabaseValue>,
        conditions: &[Condition],
    ) -> OrmResult<bool> {
        self.adjust(table, deltas, conditions, "+").await
    }

    /// `column = column - delta` for each entry; true when a row changed
    pub async fn decrement(
        &self,
        table: &str,
        deltas: &IndexMap<String, DatabaseValue>,
        conditions: &[Condition],
    ) -> OrmResult<bool> {
        self.adjust(table, deltas, conditions, "-").await
    }

    async fn adjust(
        &self,
        table: &str,
        deltas: &IndexMap<String, DatabaseValue>,
        conditions: &[Condition],
        operator: &str,
    ) -> OrmResult<bool> {
        if deltas.is_empty() {
            return Ok(false);
        }
        let dialect = self.dialect();
        let mut sink = ParamSink::new();

        let mut assignments = Vec::with_capacity(deltas.len());
        for (column, delta) in deltas {
            if !delta.is_numeric() {
                return Err(OrmError::invalid_argument(format!(
                    "Cannot adjust column '{}' by non-numeric value {}",
                    column, delta
                )));
            }
            let quoted = quote_identifier(column, dialect);
            let placeholder = sink.bind(column, delta.clone());
            assignments.push(format!("{} = {} {} {}", quoted, quoted, operator, placeholder));
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_qualified(table, dialect),
            assignments.join(", ")
        );
        self.push_where(&mut sql, conditions, &mut sink)?;

        let (named, _) = sink.finish();
        let params: Vec<DatabaseValue> = named.into_iter().map(|(_, value)| value).collect();
        Ok(self.execute(&sql, &params).await?.rows_affected > 0)
    }

    fn push_where(&self, sql: &mut String, conditions: &[Condition], sink: &mut ParamSink) -> OrmResult<()> {
        let clause = ConditionParser::new(self.dialect()).compile(conditions, sink)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(())
    }

    /// Whether `table` exists; a missing-table driver error reads as false
    pub async fn table_exists(&self, table: &str) -> OrmResult<bool> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", quote_qualified(table, self.dialect()));
        match self.query(&sql, &[]).await {
            Ok(_) => Ok(true),
            Err(OrmError::QueryFailed { code, message }) if self.dialect().is_missing_table(&code, &message) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` with ready-made column definitions
    pub async fn create_table(&self, table: &str, definitions: &[String]) -> OrmResult<()> {
        validate_identifier(table)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(table, self.dialect()),
            definitions.join(", ")
        );
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn add_column(&self, table: &str, column: &str, definition: &str) -> OrmResult<()> {
        validate_identifier(column)?;
        let dialect = self.dialect();
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_qualified(table, dialect),
            quote_identifier(column, dialect),
            definition
        );
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Change a column's type; SQLite cannot alter columns in place
    pub async fn alter_column(&self, table: &str, column: &str, definition: &str) -> OrmResult<()> {
        validate_identifier(column)?;
        let dialect = self.dialect();
        let table = quote_qualified(table, dialect);
        let column = quote_identifier(column, dialect);
        let sql = match dialect {
            SqlDialect::PostgreSQL => format!("ALTER TABLE {} ALTER COLUMN {} TYPE {}", table, column, definition),
            SqlDialect::MySQL => format!("ALTER TABLE {} MODIFY COLUMN {} {}", table, column, definition),
            SqlDialect::SQLite => {
                return Err(OrmError::invalid_argument(
                    "SQLite does not support altering a column definition",
                ))
            }
        };
        self.execute(&sql, &[]).await?;
        Ok(())
    }
}

/// Inline the `NOW()` sentinel, booleans and NULL; bind everything else
fn render_value(column: &str, value: DatabaseValue, dialect: SqlDialect, sink: &mut ParamSink) -> String {
    match value {
        DatabaseValue::Null => "NULL".to_string(),
        DatabaseValue::Bool(b) => dialect.boolean_literal(b).to_string(),
        DatabaseValue::String(s) if s == NOW => dialect.current_timestamp().to_string(),
        other => sink.bind(column, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_value_inlines_sentinels() {
        let mut sink = ParamSink::new();
        assert_eq!(
            render_value("created_at", DatabaseValue::from(NOW), SqlDialect::PostgreSQL, &mut sink),
            "NOW()"
        );
        assert_eq!(
            render_value("created_at", DatabaseValue::from(NOW), SqlDialect::SQLite, &mut sink),
            "CURRENT_TIMESTAMP"
        );
        assert_eq!(
            render_value("active", DatabaseValue::Bool(true), SqlDialect::MySQL, &mut sink),
            "1"
        );
        assert_eq!(
            render_value("name", DatabaseValue::from("Acme"), SqlDialect::MySQL, &mut sink),
            ":name1"
        );
        assert_eq!(sink.named().len(), 1);
    }

    #[test]
    fn test_insert_options_builder() {
        let options = InsertOptions::new()
            .ignore_duplicates()
            .upsert(&["total"])
            .on_conflict(&["id"])
            .returning("id");
        assert!(options.ignore_duplicates);
        assert_eq!(options.upsert_columns, vec!["total".to_string()]);
        assert_eq!(options.returning.as_deref(), Some("id"));
    }
}
