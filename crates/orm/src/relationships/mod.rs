//! Relationships Module - relation metadata, naming conventions, lazy
//! resolution, junction persistence and the identity map

pub mod identity_map;
pub mod junction;
pub mod metadata;
pub mod naming;
pub mod resolver;

// Re-export main types
pub use identity_map::{IdentityMap, IdentityMapMetrics};
pub use junction::{Junction, SyncResult};
pub use metadata::{RelationDescriptor, RelationKind};
pub use resolver::RelationResolver;
