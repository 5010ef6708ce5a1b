//! Field metadata and the schema registry
//!
//! A [`ModelSchema`] lists a model's fields, computed getters and validators
//! and derives the field-access dispatch table from them. The
//! [`SchemaRegistry`] builds each schema once per model type and merges in
//! extra fields registered by collaborators.

use dashmap::DashMap;
use indexmap::IndexMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{OrmError, OrmResult, ValidationErrors};
use crate::model::{Model, Record};
use crate::relationships::{RelationDescriptor, RelationKind};

/// Declared SQL type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal(u8, u8),
    Boolean,
    Char(u32),
    Varchar(u32),
    Text,
    Date,
    DateTime,
    Timestamp,
    Time,
    Json,
    Uuid,
    Binary,
}

/// Coercion family of an [`SqlType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Boolean,
    Text,
    Date,
    DateTime,
    Time,
    Json,
    Uuid,
    Binary,
}

impl SqlType {
    pub fn family(&self) -> TypeFamily {
        match self {
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => TypeFamily::Integer,
            SqlType::Float | SqlType::Double | SqlType::Decimal(..) => TypeFamily::Float,
            SqlType::Boolean => TypeFamily::Boolean,
            SqlType::Char(_) | SqlType::Varchar(_) | SqlType::Text => TypeFamily::Text,
            SqlType::Date => TypeFamily::Date,
            SqlType::DateTime | SqlType::Timestamp => TypeFamily::DateTime,
            SqlType::Time => TypeFamily::Time,
            SqlType::Json => TypeFamily::Json,
            SqlType::Uuid => TypeFamily::Uuid,
            SqlType::Binary => TypeFamily::Binary,
        }
    }

    /// Column type as written in DDL
    pub fn ddl(&self, dialect: SqlDialect) -> String {
        match (self, dialect) {
            (SqlType::SmallInt, _) => "SMALLINT".to_string(),
            (SqlType::Integer, _) => "INTEGER".to_string(),
            (SqlType::BigInt, _) => "BIGINT".to_string(),
            (SqlType::Float, _) => "REAL".to_string(),
            (SqlType::Double, SqlDialect::PostgreSQL) => "DOUBLE PRECISION".to_string(),
            (SqlType::Double, _) => "DOUBLE".to_string(),
            (SqlType::Decimal(precision, scale), _) => format!("DECIMAL({}, {})", precision, scale),
            (SqlType::Boolean, SqlDialect::MySQL) => "TINYINT(1)".to_string(),
            (SqlType::Boolean, _) => "BOOLEAN".to_string(),
            (SqlType::Char(length), _) => format!("CHAR({})", length),
            (SqlType::Varchar(length), _) => format!("VARCHAR({})", length),
            (SqlType::Text, _) => "TEXT".to_string(),
            (SqlType::Date, _) => "DATE".to_string(),
            (SqlType::DateTime, SqlDialect::PostgreSQL) => "TIMESTAMP".to_string(),
            (SqlType::DateTime, _) => "DATETIME".to_string(),
            (SqlType::Timestamp, _) => "TIMESTAMP".to_string(),
            (SqlType::Time, _) => "TIME".to_string(),
            (SqlType::Json, SqlDialect::PostgreSQL) => "JSONB".to_string(),
            (SqlType::Json, SqlDialect::MySQL) => "JSON".to_string(),
            (SqlType::Json, SqlDialect::SQLite) => "TEXT".to_string(),
            (SqlType::Uuid, SqlDialect::PostgreSQL) => "UUID".to_string(),
            (SqlType::Uuid, _) => "CHAR(36)".to_string(),
            (SqlType::Binary, SqlDialect::PostgreSQL) => "BYTEA".to_string(),
            (SqlType::Binary, _) => "BLOB".to_string(),
        }
    }
}

impl FromStr for SqlType {
    type Err = OrmError;

    /// Parse a declaration such as `varchar(64)`, `decimal(10,2)` or `datetime`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (base, args) = match lower.split_once('(') {
            Some((base, rest)) => (base.trim(), rest.trim_end_matches(')').trim()),
            None => (lower.as_str(), ""),
        };
        let numbers: Vec<u32> = args
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect();
        let first = numbers.first().copied();

        let sql_type = match base {
            "smallint" | "tinyint" => SqlType::SmallInt,
            "int" | "integer" | "mediumint" => SqlType::Integer,
            "bigint" | "serial" | "bigserial" => SqlType::BigInt,
            "float" | "real" => SqlType::Float,
            "double" | "double precision" => SqlType::Double,
            "decimal" | "numeric" => SqlType::Decimal(
                first.unwrap_or(10) as u8,
                numbers.get(1).copied().unwrap_or(0) as u8,
            ),
            "bool" | "boolean" => SqlType::Boolean,
            "char" => SqlType::Char(first.unwrap_or(1)),
            "varchar" | "character varying" => SqlType::Varchar(first.unwrap_or(255)),
            "text" | "mediumtext" | "longtext" => SqlType::Text,
            "date" => SqlType::Date,
            "datetime" => SqlType::DateTime,
            "timestamp" | "timestamptz" => SqlType::Timestamp,
            "time" => SqlType::Time,
            "json" | "jsonb" => SqlType::Json,
            "uuid" => SqlType::Uuid,
            "blob" | "bytea" | "binary" | "varbinary" => SqlType::Binary,
            other => {
                return Err(OrmError::InvalidArgument(format!(
                    "Unknown SQL type '{}'",
                    other
                )))
            }
        };
        Ok(sql_type)
    }
}

/// How a field name is served by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    PlainColumn,
    Relation(RelationKind),
    Computed,
}

/// Static metadata of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<DatabaseValue>,
    pub relation: Option<RelationDescriptor>,
    /// Protected fields are skipped by bulk assignment
    pub protected: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            nullable: true,
            default: None,
            relation: None,
            protected: false,
        }
    }

    /// A relation field; it has no column of its own
    pub fn relation(name: &str, relation: RelationDescriptor) -> Self {
        Self {
            relation: Some(relation),
            ..Self::new(name, SqlType::BigInt)
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default<V: Into<DatabaseValue>>(mut self, value: V) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn is_column(&self) -> bool {
        self.relation.is_none()
    }

    pub fn access(&self) -> FieldAccess {
        match &self.relation {
            Some(relation) => FieldAccess::Relation(relation.kind),
            None => FieldAccess::PlainColumn,
        }
    }
}

/// Read-only value derived from a record
pub type ComputedGetter = Arc<dyn Fn(&Record) -> DatabaseValue + Send + Sync>;

/// Ad-hoc validator run by `validate()` after the required-field checks
pub type Validator = Arc<dyn Fn(&Record, &mut ValidationErrors) + Send + Sync>;

/// Complete metadata of one model type
#[derive(Clone)]
pub struct ModelSchema {
    name: String,
    table: String,
    primary_key: String,
    connection: String,
    fields: IndexMap<String, FieldDescriptor>,
    computed: IndexMap<String, ComputedGetter>,
    validators: Vec<Validator>,
    dispatch: HashMap<String, FieldAccess>,
}

impl ModelSchema {
    /// New schema with an `id` BIGINT primary key, bound to the `default` connection.
    ///
    /// `table` is the logical table name; the connection's table prefix is
    /// applied when SQL is generated.
    pub fn new(name: &str, table: &str) -> Self {
        let mut schema = Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            connection: "default".to_string(),
            fields: IndexMap::new(),
            computed: IndexMap::new(),
            validators: Vec::new(),
            dispatch: HashMap::new(),
        };
        schema.append_field(FieldDescriptor::new("id", SqlType::BigInt));
        schema
    }

    /// Replace the default `id` key
    pub fn with_primary_key(mut self, column: &str, sql_type: SqlType) -> Self {
        if self.primary_key != column {
            let old = std::mem::replace(&mut self.primary_key, column.to_string());
            self.fields.shift_remove(&old);
            self.dispatch.remove(&old);
        }
        self.append_field(FieldDescriptor::new(column, sql_type));
        self
    }

    pub fn on_connection(mut self, connection: &str) -> Self {
        self.connection = connection.to_string();
        self
    }

    /// Declare a field; a second declaration of the same name replaces the first
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.append_field(field);
        self
    }

    /// Shorthand for a plain column field
    pub fn column(self, name: &str, sql_type: SqlType) -> Self {
        self.field(FieldDescriptor::new(name, sql_type))
    }

    pub fn has_one<T: Model>(self, name: &str) -> Self {
        self.field(FieldDescriptor::relation(name, RelationDescriptor::has_one::<T>()))
    }

    pub fn has_many<T: Model>(self, name: &str) -> Self {
        self.field(FieldDescriptor::relation(name, RelationDescriptor::has_many::<T>()))
    }

    pub fn belongs_to<T: Model>(self, name: &str) -> Self {
        self.field(FieldDescriptor::relation(name, RelationDescriptor::belongs_to::<T>()))
    }

    pub fn many_to_many<T: Model>(self, name: &str) -> Self {
        self.field(FieldDescriptor::relation(name, RelationDescriptor::many_to_many::<T>()))
    }

    /// Register a computed getter in the dispatch table
    pub fn computed<F>(mut self, name: &str, getter: F) -> Self
    where
        F: Fn(&Record) -> DatabaseValue + Send + Sync + 'static,
    {
        self.computed.insert(name.to_string(), Arc::new(getter));
        self.dispatch.insert(name.to_string(), FieldAccess::Computed);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Record, &mut ValidationErrors) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub(crate) fn append_field(&mut self, field: FieldDescriptor) {
        self.dispatch.insert(field.name.clone(), field.access());
        self.fields.insert(field.name.clone(), field);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical table name, without connection prefix
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn field_descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Names of fields backed by a column, in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .values()
            .filter(|field| field.is_column())
            .map(|field| field.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.access(name) == Some(FieldAccess::PlainColumn)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.fields.get(name)?.relation.as_ref()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDescriptor)> {
        self.fields
            .values()
            .filter_map(|field| field.relation.as_ref().map(|r| (field.name.as_str(), r)))
    }

    /// Dispatch entry for a field name
    pub fn access(&self, name: &str) -> Option<FieldAccess> {
        self.dispatch.get(name).copied()
    }

    pub fn computed_getter(&self, name: &str) -> Option<&ComputedGetter> {
        self.computed.get(name)
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("connection", &self.connection)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Schemas keyed by model type, built lazily and shared by every record
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<TypeId, Arc<ModelSchema>>,
    /// model name -> (donor, field)
    extra_fields: DashMap<String, Vec<(String, FieldDescriptor)>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema<M: Model>(&self) -> Arc<ModelSchema> {
        self.resolve(TypeId::of::<M>(), M::schema)
    }

    /// Schema for a type id, built with `build` on first access
    pub fn resolve(&self, type_id: TypeId, build: fn() -> ModelSchema) -> Arc<ModelSchema> {
        if let Some(schema) = self.schemas.get(&type_id) {
            return Arc::clone(schema.value());
        }
        let schema = self
            .schemas
            .entry(type_id)
            .or_insert_with(|| Arc::new(self.assemble(build())));
        Arc::clone(schema.value())
    }

    /// Append a field to a model on behalf of `donor`.
    ///
    /// The same donor may re-register a field; two donors claiming one name
    /// is a `DonorConflict`. Cached schemas of the model are dropped so the
    /// field is visible to every later lookup.
    pub fn register_extra_field(&self, model: &str, donor: &str, field: FieldDescriptor) -> OrmResult<()> {
        {
            let mut extras = self.extra_fields.entry(model.to_string()).or_default();
            if let Some(position) = extras.iter().position(|(_, existing)| existing.name == field.name) {
                let first = &extras[position].0;
                if first != donor {
                    return Err(OrmError::DonorConflict {
                        model: model.to_string(),
                        field: field.name.clone(),
                        first: first.clone(),
                        second: donor.to_string(),
                    });
                }
                extras[position].1 = field;
            } else {
                extras.push((donor.to_string(), field));
            }
        }
        self.schemas.retain(|_, schema| schema.name() != model);
        Ok(())
    }

    /// Extra fields registered for a model, with their donors
    pub fn extra_fields(&self, model: &str) -> Vec<(String, FieldDescriptor)> {
        self.extra_fields
            .get(model)
            .map(|extras| extras.value().clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.schemas.clear();
        self.extra_fields.clear();
    }

    fn assemble(&self, mut schema: ModelSchema) -> ModelSchema {
        if let Some(extras) = self.extra_fields.get(schema.name()) {
            for (donor, field) in extras.iter() {
                if schema.field_descriptor(&field.name).is_some() {
                    tracing::warn!(
                        model = schema.name(),
                        field = field.name.as_str(),
                        donor = donor.as_str(),
                        "extra field shadows a declared field and is ignored"
                    );
                    continue;
                }
                schema.append_field(field.clone());
            }
        }
        schema
    }
}
