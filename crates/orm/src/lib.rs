//! # elif-record: active-record mapping layer
//!
//! Maps rows of declared tables to [`Record`]s with typed coercion, dirty
//! tracking and lazily resolved relations, and builds SQL through a fluent
//! [`QueryBuilder`] whose bindings always line up with the placeholders of
//! the compiled statement.
//!
//! ```no_run
//! use elif_record::{Database, ModelExt};
//! # use elif_record::{Model, ModelSchema, Record, SqlType};
//! # struct Order(Record);
//! # impl Model for Order {
//! #     fn schema() -> ModelSchema { ModelSchema::new("Order", "orders").column("status", SqlType::Varchar(32)) }
//! #     fn from_record(record: Record) -> Self { Self(record) }
//! #     fn record(&self) -> &Record { &self.0 }
//! #     fn record_mut(&mut self) -> &mut Record { &mut self.0 }
//! #     fn into_record(self) -> Record { self.0 }
//! # }
//!
//! # async fn run() -> elif_record::OrmResult<()> {
//! let db = Database::from_env()?;
//! let paid: Vec<Order> = Order::find(&db)?
//!     .where_eq("status", "paid")
//!     .order_by("id", "DESC")
//!     .limit(10)
//!     .get(&db)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod conditions;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod event_error;
pub mod events;
pub mod model;
pub mod observers;
pub mod query;
pub mod relationships;
pub mod schema;
pub mod security;
pub mod sql;
pub mod testing;

// Re-export core traits and types
pub use backends::{Connector, DatabaseBackendType, DatabaseConnection, DatabaseValue, ExecuteResult, Row, SqlDialect};
pub use conditions::{Condition, ConditionParser, Operand};
pub use config::{ConnectionConfig, DatabaseConfig, DEFAULT_CONNECTION};
pub use connection::{Adapter, InsertOptions, NOW};
pub use database::Database;
pub use error::{OrmError, OrmResult, ValidationErrors};
pub use event_error::EventError;
pub use events::{RecordEvent, RecordObserver};
pub use model::{FieldValue, Model, ModelExt, ModelLifecycle, Record, RelationValue};
pub use observers::ObserverManager;
pub use query::{Boolean, QueryBuilder};
pub use relationships::{IdentityMap, RelationDescriptor, RelationKind, RelationResolver};
pub use schema::{FieldDescriptor, ModelSchema, SchemaRegistry, SqlType};
pub use sql::{CompiledQuery, SqlCompiler};
