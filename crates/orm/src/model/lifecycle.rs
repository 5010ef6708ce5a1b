//! Record lifecycle: validate, save (insert or diff-based update), delete
//! and hooked bulk assignment.

use chrono::{Timelike, Utc};
use indexmap::IndexMap;

use super::record::Record;
use super::value::FieldValue;
use crate::backends::DatabaseValue;
use crate::conditions::Condition;
use crate::connection::InsertOptions;
use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::events::RecordEvent;
use crate::relationships::RelationResolver;

/// Timestamp set on insert
pub const CREATED_AT: &str = "created_at";
/// Timestamp set on insert and on every update that writes columns
pub const UPDATED_AT: &str = "updated_at";
/// Acting user set on insert
pub const CREATED_BY: &str = "created_by";
/// Acting user set on insert and update
pub const UPDATED_BY: &str = "updated_by";

/// Persistence flows of records bound to one database context
#[derive(Debug, Clone, Copy)]
pub struct ModelLifecycle<'a> {
    db: &'a Database,
}

impl<'a> ModelLifecycle<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new record or write the changed columns of a persisted one.
    ///
    /// Returns `Ok(false)` when a hook vetoes or validation fails; the
    /// validation messages are left in `record.errors()`.
    pub async fn save(&self, record: &mut Record) -> OrmResult<bool> {
        if record.is_voided() {
            return Err(OrmError::Voided(record.model_name().to_string()));
        }
        let observers = self.db.observers();

        if !observers.before(RecordEvent::Saving, record).await? {
            return Ok(false);
        }
        if !self.validate(record).await? {
            return Ok(false);
        }

        let inserting = record.is_new();
        let written = if inserting {
            self.insert(record).await?
        } else {
            self.update(record).await?
        };
        if !written {
            return Ok(false);
        }

        RelationResolver::new(self.db).save_links(record).await?;

        observers.after(RecordEvent::Saved, record).await;
        record.mark_clean();
        if inserting {
            self.db.identity_map().store(record);
        }
        Ok(true)
    }

    /// Required-field checks plus schema validators, wrapped in the validate hooks
    pub async fn validate(&self, record: &mut Record) -> OrmResult<bool> {
        let observers = self.db.observers();
        if !observers.before(RecordEvent::Validating, record).await? {
            return Ok(false);
        }

        let errors = record.validation_errors();
        let valid = errors.is_empty();
        if !valid {
            tracing::debug!(model = record.model_name(), "validation failed: {}", errors);
        }
        record.set_errors(errors);

        observers.after(RecordEvent::Validated, record).await;
        Ok(valid)
    }

    async fn insert(&self, record: &mut Record) -> OrmResult<bool> {
        self.fill_auto_columns(record, true);
        let observers = self.db.observers();
        if !observers.before(RecordEvent::Creating, record).await? {
            return Ok(false);
        }

        let schema = record.schema().clone();
        let adapter = self.db.adapter_for(&schema).await?;
        let table = self.db.table_name(&schema)?;
        let options = InsertOptions::new().returning(schema.primary_key());

        match adapter.insert(&table, &[record.insert_values()], &options).await? {
            Some(key) => record.assign_primary_key(key),
            None if record.is_new() => {
                tracing::warn!(model = schema.name(), table = table.as_str(), "insert returned no primary key");
            }
            None => {}
        }

        observers.after(RecordEvent::Created, record).await;
        Ok(true)
    }

    async fn update(&self, record: &mut Record) -> OrmResult<bool> {
        let observers = self.db.observers();
        if !observers.before(RecordEvent::Updating, record).await? {
            return Ok(false);
        }

        if record.changed_columns().is_empty() {
            tracing::debug!(model = record.model_name(), "no changed columns, update skipped");
        } else {
            self.fill_auto_columns(record, false);
            let schema = record.schema().clone();
            let primary_key = schema.primary_key();
            let key = match record.original(primary_key).and_then(FieldValue::as_scalar) {
                Some(original) if !original.is_empty() => original.clone(),
                _ => record.primary_key().cloned().unwrap_or(DatabaseValue::Null),
            };

            let adapter = self.db.adapter_for(&schema).await?;
            let table = self.db.table_name(&schema)?;
            adapter
                .update(
                    &table,
                    &record.changed_columns(),
                    &[Condition::key(primary_key, key.clone())],
                    true,
                )
                .await?;
            self.db.identity_map().invalidate(schema.name(), &key);
        }

        observers.after(RecordEvent::Updated, record).await;
        Ok(true)
    }

    /// Delete a persisted record and void it; new records are left alone
    pub async fn delete(&self, record: &mut Record) -> OrmResult<bool> {
        if record.is_voided() {
            return Err(OrmError::Voided(record.model_name().to_string()));
        }
        let Some(key) = record.primary_key().cloned() else {
            return Ok(false);
        };
        let observers = self.db.observers();
        if !observers.before(RecordEvent::Deleting, record).await? {
            return Ok(false);
        }

        let schema = record.schema().clone();
        let adapter = self.db.adapter_for(&schema).await?;
        let table = self.db.table_name(&schema)?;
        let deleted = adapter
            .delete(&table, &[Condition::key(schema.primary_key(), key.clone())])
            .await?;
        self.db.identity_map().invalidate(schema.name(), &key);

        observers.after(RecordEvent::Deleted, record).await;
        record.void();
        Ok(deleted > 0)
    }

    /// Bulk assignment wrapped in the set-data hooks
    pub async fn fill(&self, record: &mut Record, mut data: IndexMap<String, FieldValue>) -> OrmResult<bool> {
        let observers = self.db.observers();
        if !observers.setting_data(record, &mut data).await? {
            return Ok(false);
        }
        record.set_data(data)?;
        observers.after(RecordEvent::DataSet, record).await;
        Ok(true)
    }

    /// Stamp the auto-maintained columns the schema declares.
    ///
    /// On insert only empty columns are filled; updates always refresh
    /// `updated_at` / `updated_by`.
    pub fn fill_auto_columns(&self, record: &mut Record, inserting: bool) {
        let now = Utc::now().naive_utc();
        let now = DatabaseValue::Timestamp(now.with_nanosecond(0).unwrap_or(now));
        let user = self.db.current_user();

        let mut stamp = |column: &str, value: Option<DatabaseValue>| {
            let Some(value) = value else {
                return;
            };
            if !record.schema().has_column(column) {
                return;
            }
            let empty = record.value(column).map_or(true, DatabaseValue::is_empty);
            if !inserting || empty {
                record.write_column(column, value);
            }
        };

        if inserting {
            stamp(CREATED_AT, Some(now.clone()));
            stamp(CREATED_BY, user.clone());
        }
        stamp(UPDATED_AT, Some(now));
        stamp(UPDATED_BY, user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::schema::{ModelSchema, SqlType};
    use std::sync::Arc;

    fn article(db: &Database) -> Record {
        db.new_record(Arc::new(
            ModelSchema::new("Article", "articles")
                .column("title", SqlType::Text)
                .column(CREATED_AT, SqlType::DateTime)
                .column(UPDATED_AT, SqlType::DateTime)
                .column(UPDATED_BY, SqlType::BigInt),
        ))
    }

    #[test]
    fn test_insert_fills_declared_auto_columns() {
        let db = Database::new(DatabaseConfig::new()).with_current_user(|| Some(DatabaseValue::Int64(9)));
        let mut record = article(&db);

        ModelLifecycle::new(&db).fill_auto_columns(&mut record, true);

        assert!(matches!(record.value(CREATED_AT), Some(DatabaseValue::Timestamp(_))));
        assert!(matches!(record.value(UPDATED_AT), Some(DatabaseValue::Timestamp(_))));
        assert_eq!(record.value(UPDATED_BY), Some(&DatabaseValue::Int64(9)));
        assert_eq!(record.value(CREATED_BY), None);
    }

    #[test]
    fn test_insert_keeps_explicit_values() {
        let db = Database::new(DatabaseConfig::new());
        let mut record = article(&db);
        record.set(CREATED_AT, "2024-01-05 10:30:00").unwrap();

        ModelLifecycle::new(&db).fill_auto_columns(&mut record, true);

        assert_eq!(record.value(CREATED_AT).unwrap().to_string(), "2024-01-05 10:30:00");
        assert_eq!(record.value(UPDATED_BY), None);
    }

    #[tokio::test]
    async fn test_deleting_a_new_record_is_a_no_op() {
        let db = Database::new(DatabaseConfig::new());
        let mut record = article(&db);

        assert!(!ModelLifecycle::new(&db).delete(&mut record).await.unwrap());
        assert!(!record.is_voided());
    }
}
