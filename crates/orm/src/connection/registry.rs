//! Named connections
//!
//! One physical connection per configured name, opened lazily on first use
//! and kept until it is closed. Statements on one connection run strictly
//! one after another.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::statistics::ConnectionStats;
use crate::backends::{
    Connector, DatabaseBackendType, DatabaseConnection, DatabaseValue, ExecuteResult, Row, SqlDialect,
};
use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::error::{OrmError, OrmResult};

/// An open connection bound to a configuration name
pub struct NamedConnection {
    name: String,
    config: ConnectionConfig,
    dialect: SqlDialect,
    conn: Mutex<Box<dyn DatabaseConnection>>,
    statements: AtomicU64,
    failures: AtomicU64,
    opened_at: Instant,
}

impl NamedConnection {
    pub fn new(name: &str, config: ConnectionConfig, conn: Box<dyn DatabaseConnection>) -> Self {
        Self {
            name: name.to_string(),
            dialect: config.adapter.dialect(),
            config,
            conn: Mutex::new(conn),
            statements: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            opened_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn table_prefix(&self) -> &str {
        &self.config.table_prefix
    }

    /// Run a positional statement that returns no rows
    pub async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecuteResult> {
        let result = self.conn.lock().await.execute(sql, params).await;
        self.track(result, sql)
    }

    /// Run a positional query
    pub async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let result = self.conn.lock().await.fetch_all(sql, params).await;
        self.track(result, sql)
    }

    pub async fn close(&self) -> OrmResult<()> {
        self.conn.lock().await.close().await
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            name: self.name.clone(),
            statements: self.statements.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            opened_at: self.opened_at,
        }
    }

    fn track<T>(&self, result: OrmResult<T>, sql: &str) -> OrmResult<T> {
        self.statements.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(connection = self.name.as_str(), sql, "statement failed: {}", e);
        }
        result
    }
}

impl std::fmt::Debug for NamedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedConnection")
            .field("name", &self.name)
            .field("adapter", &self.config.adapter)
            .field("database", &self.config.database)
            .finish()
    }
}

/// Process-wide registry of named connections
pub struct ConnectionRegistry {
    config: DatabaseConfig,
    connectors: DashMap<DatabaseBackendType, Arc<dyn Connector>>,
    connections: Mutex<HashMap<String, Arc<NamedConnection>>>,
}

impl ConnectionRegistry {
    /// Registry without connectors; register at least one before connecting
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            connectors: DashMap::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Serve an adapter kind with `connector`, replacing any earlier one
    pub fn register_connector(&self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.backend_type(), connector);
    }

    pub fn has_connector(&self, backend: DatabaseBackendType) -> bool {
        self.connectors.contains_key(&backend)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn table_prefix(&self, name: &str) -> OrmResult<&str> {
        self.config.table_prefix(name)
    }

    /// The connection for `name`, opening it on first use
    pub async fn connection(&self, name: &str) -> OrmResult<Arc<NamedConnection>> {
        let mut connections = self.connections.lock().await;
        if let Some(connection) = connections.get(name) {
            return Ok(Arc::clone(connection));
        }

        let config = self.config.get(name)?.clone();
        config.validate()?;
        let connector = self
            .connectors
            .get(&config.adapter)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                OrmError::configuration(format!(
                    "No connector registered for adapter '{}' (connection '{}')",
                    config.adapter, name
                ))
            })?;

        let conn = connector.connect(&config).await?;
        tracing::debug!(connection = name, adapter = %config.adapter, "opened database connection");

        let connection = Arc::new(NamedConnection::new(name, config, conn));
        connections.insert(name.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Close and forget a connection; the next use reconnects.
    ///
    /// Returns whether the connection was open.
    pub async fn close(&self, name: &str) -> OrmResult<bool> {
        let removed = self.connections.lock().await.remove(name);
        match removed {
            Some(connection) => {
                connection.close().await?;
                tracing::debug!(connection = name, "closed database connection");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn close_all(&self) -> OrmResult<()> {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in drained {
            connection.close().await?;
        }
        Ok(())
    }

    pub async fn is_open(&self, name: &str) -> bool {
        self.connections.lock().await.contains_key(name)
    }

    pub async fn stats(&self) -> Vec<ConnectionStats> {
        self.connections
            .lock()
            .await
            .values()
            .map(|connection| connection.stats())
            .collect()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("configured", &self.config.names())
            .field("connectors", &self.connectors.iter().map(|e| *e.key()).collect::<Vec<_>>())
            .finish()
    }
}
