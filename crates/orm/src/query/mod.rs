//! Query Builder Module - fluent, backend-agnostic SELECT builder
//!
//! Fluent methods live in one file per clause family; terminal operations that
//! need a [`crate::database::Database`] are in `execution`.

pub mod builder;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod pagination;
pub mod select;
pub mod types;
pub mod where_clause;

// Re-export main types and builder
pub use builder::QueryBuilder;
pub use types::{
    AggregateFunction, Boolean, FromSource, IndexBy, JoinClause, JoinTarget, JoinType,
    OrderClause, OrderDirection, QueryOperator, SelectColumn, UnionClause,
};
