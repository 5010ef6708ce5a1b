//! SQL Generation
//!
//! This module renders query builders into SQL text plus an ordered
//! parameter list, and converts named placeholders into the positional form
//! a driver expects.

pub mod bindings;
pub mod generation;

// Re-export for convenience
pub use bindings::{BindingCategory, Bindings, ParamSink};
pub use generation::{CompiledQuery, SqlCompiler};
