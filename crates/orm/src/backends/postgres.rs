//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the driver traits
//! using sqlx as the underlying database driver. One `PostgresConnection`
//! owns one physical connection.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Postgres, Row as SqlxRow, TypeInfo, ValueRef};
use std::time::Duration;

use super::core::*;
use crate::backends::DatabaseBackendType;
use crate::config::ConnectionConfig;
use crate::error::{OrmError, OrmResult};

/// Opens PostgreSQL connections from a named configuration
#[derive(Debug, Default, Clone)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database);

        if let Some(username) = &config.username {
            options = options.username(username);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        options
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn connect(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn DatabaseConnection>> {
        if config.adapter != DatabaseBackendType::PostgreSQL {
            return Err(OrmError::Configuration(format!(
                "PostgreSQL connector cannot open a '{}' connection",
                config.adapter
            )));
        }

        let options = Self::connect_options(config);
        let timeout = Duration::from_secs(config.connect_timeout_seconds);

        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| {
                OrmError::Configuration(format!(
                    "Timed out connecting to PostgreSQL at {}:{}",
                    config.host, config.port
                ))
            })??;

        tracing::debug!(
            "Opened PostgreSQL connection to {}:{}/{}",
            config.host,
            config.port,
            config.database
        );

        Ok(Box::new(PostgresConnection::new(conn)))
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: Option<PgConnection>,
}

impl PostgresConnection {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> OrmResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| OrmError::query_failed("closed", "Connection has been closed"))
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecuteResult> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(self.conn()?).await?;

        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(self.conn()?).await?;

        rows.iter().map(pg_row_to_row).collect()
    }

    async fn close(&mut self) -> OrmResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::Timestamp(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn pg_row_to_row(row: &PgRow) -> OrmResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name(), postgres_value_to_database_value(row, index)?);
    }
    Ok(out)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => {
            let value: chrono::DateTime<chrono::Utc> = row.try_get(index)?;
            DatabaseValue::Timestamp(value.naive_utc())
        }
        "TIMESTAMP" => DatabaseValue::Timestamp(row.try_get(index)?),
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        _ => {
            // Fallback: try to get as string
            let value: String = row.try_get(index).map_err(|e| {
                OrmError::query_failed(
                    "decode",
                    format!("Cannot decode column of type '{}': {}", type_name, e),
                )
            })?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_reports_backend() {
        assert_eq!(
            PostgresConnector::new().backend_type(),
            DatabaseBackendType::PostgreSQL
        );
    }

    #[tokio::test]
    async fn test_connector_rejects_foreign_adapter() {
        let config = ConnectionConfig::new(DatabaseBackendType::MySQL, "shop");
        let err = PostgresConnector::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
