//! Database Backend Abstractions
//!
//! Drivers implement [`DatabaseConnection`] and are created through a
//! [`Connector`]. SQL text differences between backends are captured by
//! [`SqlDialect`].

pub mod core;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use postgres::{PostgresConnection, PostgresConnector};

use serde::{Deserialize, Serialize};

use crate::error::OrmError;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// SQL dialect spoken by this backend
    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::MySQL => SqlDialect::MySQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" | "sqlite3" => Ok(DatabaseBackendType::SQLite),
            _ => Err(OrmError::Configuration(format!(
                "Unsupported database adapter: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for DatabaseBackendType {
    type Error = OrmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatabaseBackendType> for String {
    fn from(backend: DatabaseBackendType) -> Self {
        backend.to_string()
    }
}
