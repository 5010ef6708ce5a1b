//! Lazy relation resolution
//!
//! A relation is queried the first time it is loaded and cached on the
//! record afterwards, including "no related row". Records without a primary
//! key never query their dependents.

use std::sync::Arc;

use super::junction::{Junction, SyncResult, NAME_COLUMN};
use super::metadata::{RelationDescriptor, RelationKind};
use crate::backends::DatabaseValue;
use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::model::{Record, RelationValue};
use crate::schema::ModelSchema;

/// Loads and persists relations of records
#[derive(Debug, Clone, Copy)]
pub struct RelationResolver<'a> {
    db: &'a Database,
}

impl<'a> RelationResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve relation `name`, from the record's cache when already loaded
    pub async fn load(&self, record: &mut Record, name: &str) -> OrmResult<RelationValue> {
        if record.is_voided() {
            return Err(OrmError::Voided(record.model_name().to_string()));
        }
        let descriptor = record
            .schema()
            .relation(name)
            .cloned()
            .ok_or_else(|| OrmError::relation_not_found(record.model_name(), name))?;
        if let Some(cached) = record.cached_relation(name) {
            return Ok(cached.clone());
        }

        let target = self
            .db
            .schemas()
            .resolve(descriptor.target_type(), descriptor.target_schema_fn());

        let value = match descriptor.kind {
            RelationKind::BelongsTo => RelationValue::One(self.belongs_to(record, &descriptor, &target).await?),
            RelationKind::ManyToMany if record.pending_links(name).is_some() => {
                let ids = record.pending_links(name).map(<[_]>::to_vec).unwrap_or_default();
                RelationValue::Many(self.by_keys(&target, ids).await?)
            }
            kind if record.is_new() => {
                tracing::debug!(model = record.model_name(), relation = name, "unsaved record has no dependents");
                return Ok(if kind.is_collection() {
                    RelationValue::Many(Vec::new())
                } else {
                    RelationValue::One(None)
                });
            }
            RelationKind::HasOne => RelationValue::One(self.dependents(record, &descriptor, &target, true).await?.pop()),
            RelationKind::HasMany => RelationValue::Many(self.dependents(record, &descriptor, &target, false).await?),
            RelationKind::ManyToMany => RelationValue::Many(self.linked(record, name, &descriptor, &target).await?),
        };

        record.cache_relation(name, value.clone());
        Ok(value)
    }

    async fn belongs_to(
        &self,
        record: &Record,
        descriptor: &RelationDescriptor,
        target: &Arc<ModelSchema>,
    ) -> OrmResult<Option<Record>> {
        match record.value(&descriptor.local_key_column()) {
            Some(key) if !key.is_empty() => self.db.find_record(target, key).await,
            _ => Ok(None),
        }
    }

    async fn dependents(
        &self,
        record: &Record,
        descriptor: &RelationDescriptor,
        target: &Arc<ModelSchema>,
        single: bool,
    ) -> OrmResult<Vec<Record>> {
        let Some(key) = record.primary_key().cloned() else {
            return Ok(Vec::new());
        };
        let mut query = self
            .db
            .query_for(target)?
            .where_key(&descriptor.foreign_key_column(record.schema()), key);
        if single {
            query = query.limit(1);
        }
        self.db.fetch_records(target, &query).await
    }

    async fn by_keys(&self, target: &Arc<ModelSchema>, ids: Vec<DatabaseValue>) -> OrmResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.db.query_for(target)?.where_in(target.primary_key(), ids);
        self.db.fetch_records(target, &query).await
    }

    async fn linked(
        &self,
        record: &Record,
        name: &str,
        descriptor: &RelationDescriptor,
        target: &Arc<ModelSchema>,
    ) -> OrmResult<Vec<Record>> {
        let Some(key) = record.primary_key().cloned() else {
            return Ok(Vec::new());
        };
        let junction = self.junction(record.schema(), name, descriptor, target)?;
        let target_table = self.db.table_name(target)?;
        let links = junction.table();

        let mut query = self
            .db
            .query_for(target)?
            .join(
                links,
                &format!("{}.{}", links, junction.related_key()),
                "=",
                &format!("{}.{}", target_table, target.primary_key()),
            )
            .where_key(&format!("{}.{}", links, junction.owner_key()), key);
        if let Some(slot) = junction.slot() {
            query = query.where_key(&format!("{}.{}", links, NAME_COLUMN), DatabaseValue::from(slot));
        }

        match self.db.fetch_records(target, &query).await {
            Ok(records) => Ok(records),
            Err(OrmError::QueryFailed { code, message }) => {
                let dialect = self.db.adapter_for(target).await?.dialect();
                if dialect.is_missing_table(&code, &message) {
                    tracing::debug!(table = links, "junction table does not exist yet, no related rows");
                    Ok(Vec::new())
                } else {
                    Err(OrmError::QueryFailed { code, message })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Junction layout of a many-to-many relation of `owner`
    pub fn junction(
        &self,
        owner: &ModelSchema,
        name: &str,
        descriptor: &RelationDescriptor,
        target: &ModelSchema,
    ) -> OrmResult<Junction> {
        let prefix = self.db.table_prefix(owner.connection())?;
        Ok(Junction::for_relation(owner, name, descriptor, target, prefix))
    }

    /// Write pending many-to-many assignments of a persisted record
    pub async fn save_links(&self, record: &mut Record) -> OrmResult<Vec<(String, SyncResult)>> {
        if !record.has_pending_links() {
            return Ok(Vec::new());
        }
        let Some(key) = record.primary_key().cloned() else {
            return Err(OrmError::invalid_argument(format!(
                "Cannot link '{}' records before they are saved",
                record.model_name()
            )));
        };

        let adapter = self.db.adapter_for(record.schema()).await?;
        let mut results = Vec::new();
        for (name, ids) in record.take_pending_links() {
            let descriptor = record
                .schema()
                .relation(&name)
                .cloned()
                .ok_or_else(|| OrmError::relation_not_found(record.model_name(), &name))?;
            let target = self
                .db
                .schemas()
                .resolve(descriptor.target_type(), descriptor.target_schema_fn());
            let junction = self.junction(record.schema(), &name, &descriptor, &target)?;
            let result = junction.sync(&adapter, &key, &ids).await?;
            results.push((name, result));
        }
        Ok(results)
    }
}
