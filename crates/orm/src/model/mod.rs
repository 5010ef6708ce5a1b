//! Model System - dynamic records and typed model wrappers
//!
//! - `value`: tagged field values and resolved relation values
//! - `coercion`: assignment-time type coercion and the text import filter
//! - `record`: the dynamic record with change tracking and relation cache
//! - `lifecycle`: save / validate / delete flows with observer hooks
//!
//! A domain type implements [`Model`] by declaring its schema and wrapping
//! a [`Record`]; [`ModelExt`] then provides the persistence helpers.

pub mod coercion;
pub mod lifecycle;
pub mod record;
pub mod value;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::backends::DatabaseValue;
use crate::conditions::Condition;
use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::query::{Boolean, QueryBuilder};
use crate::relationships::RelationResolver;
use crate::schema::ModelSchema;

pub use coercion::{HtmlEscapeFilter, ImportFilter, PassThrough};
pub use lifecycle::ModelLifecycle;
pub use record::Record;
pub use value::{FieldValue, RelationValue};

/// A typed domain wrapper over a [`Record`]
pub trait Model: Send + Sync + 'static {
    /// Table, columns and relations; built once per process and registry
    fn schema() -> ModelSchema
    where
        Self: Sized;

    fn from_record(record: Record) -> Self
    where
        Self: Sized;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    fn into_record(self) -> Record
    where
        Self: Sized;
}

/// Persistence and relation helpers for every [`Model`]
#[async_trait]
pub trait ModelExt: Model + Sized {
    /// Unsaved instance with column defaults applied
    fn new(db: &Database) -> Self {
        Self::from_record(db.new_record(db.schema::<Self>()))
    }

    /// Query over this model's table
    fn find(db: &Database) -> OrmResult<QueryBuilder<Self>> {
        db.query::<Self>()
    }

    /// Load by primary key, served from the identity map when cached
    async fn get_by_id<K>(db: &Database, key: K) -> OrmResult<Option<Self>>
    where
        K: Into<DatabaseValue> + Send,
    {
        let schema = db.schema::<Self>();
        Ok(db
            .find_record(&schema, &key.into())
            .await?
            .map(Self::from_record))
    }

    /// First record matching all `conditions`; the result is kept in the identity map
    async fn fetch_one(db: &Database, conditions: Vec<Condition>) -> OrmResult<Option<Self>> {
        let query = db.query::<Self>()?.where_conditions(conditions, Boolean::And);
        let found = query.first(db).await?;
        if let Some(model) = &found {
            db.identity_map().store(model.record());
        }
        Ok(found)
    }

    /// Insert or update; `Ok(false)` on veto or failed validation
    async fn save(&mut self, db: &Database) -> OrmResult<bool> {
        ModelLifecycle::new(db).save(self.record_mut()).await
    }

    async fn validate(&mut self, db: &Database) -> OrmResult<bool> {
        ModelLifecycle::new(db).validate(self.record_mut()).await
    }

    /// Delete the row and void this instance
    async fn delete(&mut self, db: &Database) -> OrmResult<bool> {
        ModelLifecycle::new(db).delete(self.record_mut()).await
    }

    /// Bulk assignment with the set-data hooks
    async fn fill(&mut self, db: &Database, data: IndexMap<String, FieldValue>) -> OrmResult<bool> {
        ModelLifecycle::new(db).fill(self.record_mut(), data).await
    }

    /// Resolve a to-one relation as `T`
    async fn related_one<T: Model>(&mut self, db: &Database, name: &str) -> OrmResult<Option<T>> {
        let value = RelationResolver::new(db).load(self.record_mut(), name).await?;
        match value {
            RelationValue::One(record) => record.map(|record| wrap::<T>(db, record)).transpose(),
            RelationValue::Many(_) => Err(OrmError::invalid_argument(format!(
                "Relation '{}' of model '{}' is a collection",
                name,
                self.record().model_name()
            ))),
        }
    }

    /// Resolve a to-many relation as `T`
    async fn related_many<T: Model>(&mut self, db: &Database, name: &str) -> OrmResult<Vec<T>> {
        let value = RelationResolver::new(db).load(self.record_mut(), name).await?;
        value
            .into_records()
            .into_iter()
            .map(|record| wrap::<T>(db, record))
            .collect()
    }

    fn get(&self, name: &str) -> OrmResult<FieldValue> {
        self.record().get(name)
    }

    fn set<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> OrmResult<()> {
        self.record_mut().set(name, value)
    }
}

impl<M: Model> ModelExt for M {}

fn wrap<T: Model>(db: &Database, record: Record) -> OrmResult<T> {
    let expected = db.schema::<T>();
    if record.model_name() != expected.name() {
        return Err(OrmError::invalid_argument(format!(
            "Related record is a '{}', not a '{}'",
            record.model_name(),
            expected.name()
        )));
    }
    Ok(T::from_record(record))
}
