//! Relationship Metadata - relation kinds and per-field relation descriptors

use std::any::TypeId;
use std::fmt;

use super::naming::foreign_key_name;
use crate::model::Model;
use crate::schema::ModelSchema;

/// Defines the type of relationship between models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// One-to-one, the related row holds the foreign key
    HasOne,
    /// One-to-many, the related rows hold the foreign key
    HasMany,
    /// Many-to-one, this row holds the foreign key
    BelongsTo,
    /// Many-to-many through a junction table
    ManyToMany,
}

impl RelationKind {
    /// Returns true if this relationship resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }

    /// Returns true if this relationship requires a junction table
    pub fn requires_junction(self) -> bool {
        matches!(self, Self::ManyToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::HasOne => "HAS_ONE",
            RelationKind::HasMany => "HAS_MANY",
            RelationKind::BelongsTo => "BELONGS_TO",
            RelationKind::ManyToMany => "MANY_TO_MANY",
        };
        write!(f, "{}", name)
    }
}

/// Relation attached to a field descriptor.
///
/// Keys left unset are derived by the naming conventions in
/// [`crate::relationships::naming`] when the relation is resolved.
#[derive(Clone)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    /// Column on the related table (HAS_ONE / HAS_MANY)
    pub foreign_key: Option<String>,
    /// Column on this table (BELONGS_TO)
    pub local_key: Option<String>,
    /// Junction table name, without prefix (MANY_TO_MANY)
    pub junction_table: Option<String>,
    /// Whether junction rows carry a `name` column holding the field name
    pub discriminated: bool,
    target_type: TypeId,
    target_name: &'static str,
    target_schema: fn() -> ModelSchema,
}

impl RelationDescriptor {
    fn new<T: Model>(kind: RelationKind) -> Self {
        Self {
            kind,
            foreign_key: None,
            local_key: None,
            junction_table: None,
            discriminated: true,
            target_type: TypeId::of::<T>(),
            target_name: std::any::type_name::<T>(),
            target_schema: T::schema,
        }
    }

    pub fn has_one<T: Model>() -> Self {
        Self::new::<T>(RelationKind::HasOne)
    }

    pub fn has_many<T: Model>() -> Self {
        Self::new::<T>(RelationKind::HasMany)
    }

    pub fn belongs_to<T: Model>() -> Self {
        Self::new::<T>(RelationKind::BelongsTo)
    }

    pub fn many_to_many<T: Model>() -> Self {
        Self::new::<T>(RelationKind::ManyToMany)
    }

    pub fn with_foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    pub fn with_local_key(mut self, column: &str) -> Self {
        self.local_key = Some(column.to_string());
        self
    }

    pub fn with_junction_table(mut self, table: &str) -> Self {
        self.junction_table = Some(table.to_string());
        self
    }

    /// Junction rows are not tagged with the field name
    pub fn without_discriminator(mut self) -> Self {
        self.discriminated = false;
        self
    }

    pub fn target_type(&self) -> TypeId {
        self.target_type
    }

    /// Schema builder of the related model
    pub fn target_schema_fn(&self) -> fn() -> ModelSchema {
        self.target_schema
    }

    /// Column on the owning table holding a BELONGS_TO key
    pub fn local_key_column(&self) -> String {
        match &self.local_key {
            Some(column) => column.clone(),
            None => {
                let target = (self.target_schema)();
                foreign_key_name(target.table(), target.primary_key())
            }
        }
    }

    /// Column on the related table pointing back at `owner` (HAS_ONE / HAS_MANY)
    pub fn foreign_key_column(&self, owner: &ModelSchema) -> String {
        self.foreign_key
            .clone()
            .unwrap_or_else(|| foreign_key_name(owner.table(), owner.primary_key()))
    }
}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDescriptor")
            .field("kind", &self.kind)
            .field("target", &self.target_name)
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .field("junction_table", &self.junction_table)
            .field("discriminated", &self.discriminated)
            .finish()
    }
}

impl PartialEq for RelationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.target_type == other.target_type
            && self.foreign_key == other.foreign_key
            && self.local_key == other.local_key
            && self.junction_table == other.junction_table
            && self.discriminated == other.discriminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kind_properties() {
        assert!(RelationKind::HasMany.is_collection());
        assert!(RelationKind::ManyToMany.is_collection());
        assert!(!RelationKind::BelongsTo.is_collection());
        assert!(RelationKind::ManyToMany.requires_junction());
        assert!(!RelationKind::HasOne.requires_junction());
        assert_eq!(RelationKind::BelongsTo.to_string(), "BELONGS_TO");
    }
}
