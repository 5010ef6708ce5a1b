//! Connection Management
//!
//! This module keeps one lazily opened connection per configured name,
//! tracks statement statistics and executes the raw CRUD primitives.

pub mod adapter;
pub mod registry;
pub mod statistics;

// Re-export for convenience
pub use adapter::{Adapter, InsertOptions, NOW};
pub use registry::{ConnectionRegistry, NamedConnection};
pub use statistics::{AggregatedStats, ConnectionStats};
