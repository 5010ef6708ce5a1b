//! In-memory connector for tests
//!
//! [`MockConnector`] hands out connections that record every statement and
//! answer from scripted responses matched on SQL fragments. Unscripted
//! inserts get sequential keys, everything else succeeds with no rows.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backends::{Connector, DatabaseBackendType, DatabaseConnection, DatabaseValue, ExecuteResult, Row};
use crate::config::{ConnectionConfig, DatabaseConfig, DEFAULT_CONNECTION};
use crate::database::Database;
use crate::error::{OrmError, OrmResult};

/// A statement as the driver received it
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedStatement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Error { code: String, message: String },
}

#[derive(Debug, Clone)]
struct Script {
    fragment: String,
    reply: Reply,
    once: bool,
}

#[derive(Debug)]
struct MockState {
    log: Mutex<Vec<LoggedStatement>>,
    scripts: Mutex<Vec<Script>>,
    next_id: AtomicI64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockState {
    fn record(&self, sql: &str, params: &[DatabaseValue]) {
        lock(&self.log).push(LoggedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    /// First matching script; one-shot scripts are consumed
    fn reply_for(&self, sql: &str) -> Option<Reply> {
        let mut scripts = lock(&self.scripts);
        let position = scripts.iter().position(|script| sql.contains(&script.fragment))?;
        if scripts[position].once {
            Some(scripts.remove(position).reply)
        } else {
            Some(scripts[position].reply.clone())
        }
    }

    fn generated_key(&self) -> DatabaseValue {
        DatabaseValue::Int64(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Connector whose connections share one statement log and script set
#[derive(Debug, Clone)]
pub struct MockConnector {
    backend: DatabaseBackendType,
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new(backend: DatabaseBackendType) -> Self {
        Self {
            backend,
            state: Arc::new(MockState {
                log: Mutex::new(Vec::new()),
                scripts: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
            }),
        }
    }

    pub fn postgres() -> Self {
        Self::new(DatabaseBackendType::PostgreSQL)
    }

    pub fn mysql() -> Self {
        Self::new(DatabaseBackendType::MySQL)
    }

    pub fn sqlite() -> Self {
        Self::new(DatabaseBackendType::SQLite)
    }

    /// Database context with a `default` connection served by this connector
    pub fn database(&self, table_prefix: &str) -> Database {
        let config = DatabaseConfig::new().with_connection(
            DEFAULT_CONNECTION,
            ConnectionConfig::new(self.backend, "test").with_table_prefix(table_prefix),
        );
        Database::new(config).with_connector(Arc::new(self.clone()))
    }

    /// Key handed out by the next unscripted insert
    pub fn next_insert_id(&self, id: i64) -> &Self {
        self.state.next_id.store(id, Ordering::SeqCst);
        self
    }

    /// Answer every query containing `fragment` with `rows`
    pub fn on_query(&self, fragment: &str, rows: Vec<Row>) -> &Self {
        self.script(fragment, Reply::Rows(rows), false)
    }

    /// Answer the next query containing `fragment` with `rows`
    pub fn on_query_once(&self, fragment: &str, rows: Vec<Row>) -> &Self {
        self.script(fragment, Reply::Rows(rows), true)
    }

    /// Report `rows_affected` for statements containing `fragment`
    pub fn on_execute(&self, fragment: &str, rows_affected: u64) -> &Self {
        self.script(fragment, Reply::Affected(rows_affected), false)
    }

    /// Fail statements containing `fragment` with a driver error
    pub fn fail_on(&self, fragment: &str, code: &str, message: &str) -> &Self {
        self.script(
            fragment,
            Reply::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
            false,
        )
    }

    /// Fail the next statement containing `fragment` the way this backend reports a missing table
    pub fn missing_table_once(&self, fragment: &str) -> &Self {
        let (code, message) = match self.backend {
            DatabaseBackendType::PostgreSQL => ("42P01", "relation does not exist"),
            DatabaseBackendType::MySQL => ("42S02", "Table doesn't exist"),
            DatabaseBackendType::SQLite => ("1", "no such table"),
        };
        self.script(
            fragment,
            Reply::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
            true,
        )
    }

    fn script(&self, fragment: &str, reply: Reply, once: bool) -> &Self {
        lock(&self.state.scripts).push(Script {
            fragment: fragment.to_string(),
            reply,
            once,
        });
        self
    }

    pub fn statements(&self) -> Vec<LoggedStatement> {
        lock(&self.state.log).clone()
    }

    pub fn sql_log(&self) -> Vec<String> {
        lock(&self.state.log).iter().map(|statement| statement.sql.clone()).collect()
    }

    /// Statements whose SQL starts with `verb` (`SELECT`, `INSERT`, ...)
    pub fn statements_starting_with(&self, verb: &str) -> Vec<LoggedStatement> {
        lock(&self.state.log)
            .iter()
            .filter(|statement| statement.sql.starts_with(verb))
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        lock(&self.state.log).clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend
    }

    async fn connect(&self, _config: &ConnectionConfig) -> OrmResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecuteResult> {
        self.state.record(sql, params);
        match self.state.reply_for(sql) {
            Some(Reply::Error { code, message }) => Err(OrmError::QueryFailed { code, message }),
            Some(Reply::Affected(rows_affected)) => Ok(ExecuteResult {
                rows_affected,
                last_insert_id: None,
            }),
            Some(Reply::Rows(rows)) => Ok(ExecuteResult {
                rows_affected: rows.len() as u64,
                last_insert_id: None,
            }),
            None if sql.starts_with("INSERT") => Ok(ExecuteResult {
                rows_affected: 1,
                last_insert_id: Some(self.state.generated_key()),
            }),
            None => Ok(ExecuteResult {
                rows_affected: 1,
                last_insert_id: None,
            }),
        }
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        self.state.record(sql, params);
        match self.state.reply_for(sql) {
            Some(Reply::Error { code, message }) => Err(OrmError::QueryFailed { code, message }),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Affected(_)) => Ok(Vec::new()),
            None => match sql.rsplit_once(" RETURNING ") {
                Some((_, column)) => {
                    let column = column.trim().trim_matches(|c| c == '"' || c == '`');
                    Ok(vec![Row::new().with(column, self.state.generated_key())])
                }
                None => Ok(Vec::new()),
            },
        }
    }

    async fn close(&mut self) -> OrmResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripts_and_generated_keys() {
        let connector = MockConnector::postgres();
        connector
            .on_query("FROM customers", vec![Row::new().with("id", 1).with("name", "Acme")])
            .on_query_once("FROM orders", vec![Row::new().with("id", 5)])
            .next_insert_id(10);
        let mut conn = connector.connect(&ConnectionConfig::new(DatabaseBackendType::PostgreSQL, "test")).await.unwrap();

        assert_eq!(conn.fetch_all("SELECT * FROM customers", &[]).await.unwrap().len(), 1);
        assert_eq!(conn.fetch_all("SELECT * FROM orders", &[]).await.unwrap().len(), 1);
        assert!(conn.fetch_all("SELECT * FROM orders", &[]).await.unwrap().is_empty());

        let rows = conn
            .fetch_all("INSERT INTO orders (total) VALUES ($1) RETURNING id", &[DatabaseValue::Int64(3)])
            .await
            .unwrap();
        assert_eq!(rows[0].get("id"), Some(&DatabaseValue::Int64(10)));

        assert_eq!(connector.statements().len(), 4);
        assert_eq!(connector.statements()[3].params, vec![DatabaseValue::Int64(3)]);
        assert_eq!(connector.statements_starting_with("INSERT").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_uses_backend_codes() {
        let connector = MockConnector::sqlite();
        connector.missing_table_once("links");
        let mut conn = connector.connect(&ConnectionConfig::new(DatabaseBackendType::SQLite, "test")).await.unwrap();

        match conn.fetch_all("SELECT 1 FROM links LIMIT 1", &[]).await {
            Err(OrmError::QueryFailed { message, .. }) => assert!(message.contains("no such table")),
            other => panic!("expected a driver error, got {:?}", other),
        }
        assert!(conn.fetch_all("SELECT 1 FROM links LIMIT 1", &[]).await.is_ok());
    }
}
