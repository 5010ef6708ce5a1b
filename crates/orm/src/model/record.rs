//! Dynamic record state: column data, change tracking and the relation cache

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backends::{DatabaseValue, Row};
use crate::error::{OrmError, OrmResult, ValidationErrors};
use crate::relationships::{RelationDescriptor, RelationKind};
use crate::schema::{FieldAccess, ModelSchema};

use super::coercion::{coerce, values_equal, ImportFilter, PassThrough};
use super::value::{FieldValue, RelationValue};

/// One row of a declared table.
///
/// `data` holds declared columns, `extra_data` everything else a row or a
/// caller supplied. The first change of a field since the last load or save
/// is snapshotted in `old_data`; `save()` clears it.
#[derive(Clone)]
pub struct Record {
    schema: Arc<ModelSchema>,
    data: IndexMap<String, DatabaseValue>,
    extra_data: IndexMap<String, DatabaseValue>,
    old_data: IndexMap<String, FieldValue>,
    relations: HashMap<String, RelationValue>,
    pending_links: IndexMap<String, Vec<DatabaseValue>>,
    errors: ValidationErrors,
    import_filter: Arc<dyn ImportFilter>,
    voided: bool,
}

impl Record {
    /// Empty record with column defaults applied
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        let data = schema
            .fields()
            .filter(|field| field.is_column())
            .filter_map(|field| field.default.clone().map(|value| (field.name.clone(), value)))
            .collect();

        Self {
            schema,
            data,
            extra_data: IndexMap::new(),
            old_data: IndexMap::new(),
            relations: HashMap::new(),
            pending_links: IndexMap::new(),
            errors: ValidationErrors::new(),
            import_filter: Arc::new(PassThrough),
            voided: false,
        }
    }

    /// Loaded record; values are taken from the row as-is
    pub fn from_row(schema: Arc<ModelSchema>, row: Row) -> Self {
        let mut record = Self::new(schema);
        record.data.clear();
        for (column, value) in row.into_map() {
            if record.schema.has_column(&column) {
                record.data.insert(column, value);
            } else {
                record.extra_data.insert(column, value);
            }
        }
        record
    }

    pub fn with_import_filter(mut self, filter: Arc<dyn ImportFilter>) -> Self {
        self.import_filter = filter;
        self
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    /// Primary key value, `None` while the record is new
    pub fn primary_key(&self) -> Option<&DatabaseValue> {
        self.data
            .get(self.schema.primary_key())
            .filter(|value| !value.is_empty())
    }

    pub fn is_new(&self) -> bool {
        self.primary_key().is_none()
    }

    pub fn is_voided(&self) -> bool {
        self.voided
    }

    /// Raw stored value of a column or pass-through key
    pub fn value(&self, name: &str) -> Option<&DatabaseValue> {
        self.data.get(name).or_else(|| self.extra_data.get(name))
    }

    pub fn data(&self) -> &IndexMap<String, DatabaseValue> {
        &self.data
    }

    pub fn extra_data(&self) -> &IndexMap<String, DatabaseValue> {
        &self.extra_data
    }

    /// Read a field through the dispatch table.
    ///
    /// Relations that were never resolved read as `Null`; resolving them
    /// needs a database, see `RelationResolver::load`.
    pub fn get(&self, name: &str) -> OrmResult<FieldValue> {
        self.ensure_live()?;
        let value = match self.schema.access(name) {
            Some(FieldAccess::PlainColumn) => self.data.get(name).cloned().into(),
            Some(FieldAccess::Computed) => match self.schema.computed_getter(name) {
                Some(getter) => FieldValue::scalar(getter(self)),
                None => FieldValue::Null,
            },
            Some(FieldAccess::Relation(_)) => match self.relations.get(name) {
                Some(cached) => cached.clone().into(),
                None => self
                    .pending_links
                    .get(name)
                    .map(|ids| FieldValue::List(ids.clone()))
                    .unwrap_or(FieldValue::Null),
            },
            None => self.extra_data.get(name).cloned().into(),
        };
        Ok(value)
    }

    /// Assign a field through the dispatch table
    pub fn set<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> OrmResult<()> {
        self.ensure_live()?;
        let value = value.into();

        match self.schema.access(name) {
            Some(FieldAccess::PlainColumn) => {
                match value {
                    FieldValue::Raw(sql) => self.store_column(name, DatabaseValue::String(sql), false),
                    other => {
                        let scalar = other.into_scalar()?;
                        self.write_column(name, scalar);
                    }
                }
                Ok(())
            }
            Some(FieldAccess::Computed) => Err(OrmError::invalid_argument(format!(
                "Field '{}' of model '{}' is computed and cannot be assigned",
                name,
                self.schema.name()
            ))),
            Some(FieldAccess::Relation(_)) => {
                let descriptor = self
                    .schema
                    .relation(name)
                    .cloned()
                    .ok_or_else(|| OrmError::relation_not_found(self.schema.name(), name))?;
                self.set_relation(name, &descriptor, value)
            }
            None => match value {
                FieldValue::Related(_) | FieldValue::RelatedList(_) => {
                    Err(OrmError::relation_not_found(self.schema.name(), name))
                }
                other => {
                    self.extra_data.insert(name.to_string(), other.into_scalar()?);
                    Ok(())
                }
            },
        }
    }

    /// Bulk assignment; protected fields are skipped
    pub fn set_data<I, V>(&mut self, values: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = (String, V)>,
        V: Into<FieldValue>,
    {
        for (name, value) in values {
            if self
                .schema
                .field_descriptor(&name)
                .is_some_and(|field| field.protected)
            {
                tracing::debug!(model = self.schema.name(), field = name.as_str(), "skipping protected field");
                continue;
            }
            self.set(&name, value)?;
        }
        Ok(())
    }

    /// Store a column value, coercing declared columns and tracking the first change
    pub(crate) fn write_column(&mut self, name: &str, value: DatabaseValue) {
        self.store_column(name, value, true);
    }

    fn store_column(&mut self, name: &str, value: DatabaseValue, coerced: bool) {
        let current = self.value(name).cloned().unwrap_or(DatabaseValue::Null);

        let (value, unchanged) = match self.schema.field_descriptor(name) {
            Some(field) if coerced && field.is_column() => {
                let coerced = coerce(field.sql_type, value, self.import_filter.as_ref());
                let unchanged = values_equal(field.sql_type, &current, &coerced);
                (coerced, unchanged)
            }
            _ => {
                let unchanged = current == value;
                (value, unchanged)
            }
        };

        if unchanged && self.data.contains_key(name) {
            return;
        }
        if !unchanged && !self.old_data.contains_key(name) {
            self.old_data.insert(name.to_string(), FieldValue::scalar(current));
        }
        self.extra_data.shift_remove(name);
        self.data.insert(name.to_string(), value);
    }

    fn set_relation(&mut self, name: &str, descriptor: &RelationDescriptor, value: FieldValue) -> OrmResult<()> {
        match descriptor.kind {
            RelationKind::BelongsTo => {
                let local_key = self.local_key_for(descriptor);
                match value {
                    FieldValue::Related(related) => {
                        self.check_target(name, descriptor, &related)?;
                        let key = related
                            .value(related.schema().primary_key())
                            .cloned()
                            .unwrap_or(DatabaseValue::Null);
                        self.write_column(&local_key, key);
                        self.relations
                            .insert(name.to_string(), RelationValue::One(Some(*related)));
                    }
                    FieldValue::Null => {
                        self.write_column(&local_key, DatabaseValue::Null);
                        self.relations.insert(name.to_string(), RelationValue::One(None));
                    }
                    FieldValue::Scalar(key) => {
                        self.write_column(&local_key, key);
                        self.relations.remove(name);
                    }
                    other => return Err(self.wrong_relation_value(name, descriptor, &other)),
                }
            }
            RelationKind::HasOne => match value {
                FieldValue::Related(related) => {
                    self.check_target(name, descriptor, &related)?;
                    self.relations
                        .insert(name.to_string(), RelationValue::One(Some(*related)));
                }
                FieldValue::Null => {
                    self.relations.insert(name.to_string(), RelationValue::One(None));
                }
                other => return Err(self.wrong_relation_value(name, descriptor, &other)),
            },
            RelationKind::HasMany => match value {
                FieldValue::RelatedList(related) => {
                    for record in &related {
                        self.check_target(name, descriptor, record)?;
                    }
                    self.relations.insert(name.to_string(), RelationValue::Many(related));
                }
                FieldValue::Null => {
                    self.relations.insert(name.to_string(), RelationValue::Many(Vec::new()));
                }
                other => return Err(self.wrong_relation_value(name, descriptor, &other)),
            },
            RelationKind::ManyToMany => {
                let previous = self.get(name)?;
                let (ids, cached) = match value {
                    FieldValue::RelatedList(related) => {
                        for record in &related {
                            self.check_target(name, descriptor, record)?;
                        }
                        let ids = related
                            .iter()
                            .filter_map(|record| record.primary_key().cloned())
                            .collect();
                        (ids, Some(RelationValue::Many(related)))
                    }
                    FieldValue::List(ids) => (ids, None),
                    FieldValue::Scalar(id) => (vec![id], None),
                    FieldValue::Null => (Vec::new(), Some(RelationValue::Many(Vec::new()))),
                    other => return Err(self.wrong_relation_value(name, descriptor, &other)),
                };

                if !self.old_data.contains_key(name) {
                    self.old_data.insert(name.to_string(), previous);
                }
                self.pending_links.insert(name.to_string(), ids);
                match cached {
                    Some(value) => {
                        self.relations.insert(name.to_string(), value);
                    }
                    None => {
                        self.relations.remove(name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Column on this table holding a BELONGS_TO key
    pub(crate) fn local_key_for(&self, descriptor: &RelationDescriptor) -> String {
        descriptor.local_key_column()
    }

    fn check_target(&self, name: &str, descriptor: &RelationDescriptor, related: &Record) -> OrmResult<()> {
        let target = (descriptor.target_schema_fn())();
        if related.model_name() != target.name() {
            return Err(OrmError::invalid_argument(format!(
                "Relation '{}' of model '{}' expects '{}', got '{}'",
                name,
                self.schema.name(),
                target.name(),
                related.model_name()
            )));
        }
        Ok(())
    }

    fn wrong_relation_value(&self, name: &str, descriptor: &RelationDescriptor, value: &FieldValue) -> OrmError {
        OrmError::invalid_argument(format!(
            "Cannot assign a {} to {} relation '{}' of model '{}'",
            value.kind(),
            descriptor.kind,
            name,
            self.schema.name()
        ))
    }

    /// Whether a field changed since the last load or save
    pub fn is_dirty(&self, name: &str) -> bool {
        self.old_data.contains_key(name)
    }

    pub fn dirty_fields(&self) -> Vec<&str> {
        self.old_data.keys().map(String::as_str).collect()
    }

    /// Value a field held before its first change in this cycle
    pub fn original(&self, name: &str) -> Option<&FieldValue> {
        self.old_data.get(name)
    }

    /// Changed columns with their current values, relation fields excluded
    pub fn changed_columns(&self) -> IndexMap<String, DatabaseValue> {
        self.old_data
            .keys()
            .filter(|name| !matches!(self.schema.access(name), Some(FieldAccess::Relation(_))))
            .map(|name| {
                let value = self.data.get(name).cloned().unwrap_or(DatabaseValue::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// Every column currently set, as written by an insert
    pub fn insert_values(&self) -> IndexMap<String, DatabaseValue> {
        self.data.clone()
    }

    pub fn cached_relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn is_relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn cache_relation(&mut self, name: &str, value: RelationValue) {
        self.relations.insert(name.to_string(), value);
    }

    /// Drop a cached relation so the next access queries again
    pub fn forget_relation(&mut self, name: &str) {
        self.relations.remove(name);
    }

    /// Copy without resolved relations or unsaved links
    pub(crate) fn detached(&self) -> Record {
        let mut copy = self.clone();
        copy.relations.clear();
        copy.pending_links.clear();
        copy
    }

    pub fn has_pending_links(&self) -> bool {
        !self.pending_links.is_empty()
    }

    /// Ids assigned to a many-to-many field and not saved yet
    pub fn pending_links(&self, name: &str) -> Option<&[DatabaseValue]> {
        self.pending_links.get(name).map(Vec::as_slice)
    }

    pub(crate) fn take_pending_links(&mut self) -> IndexMap<String, Vec<DatabaseValue>> {
        std::mem::take(&mut self.pending_links)
    }

    /// Required-field checks followed by the schema validators
    pub fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let primary_key = self.schema.primary_key();

        for field in self.schema.fields() {
            if !field.is_column() || field.nullable || field.default.is_some() || field.name == primary_key {
                continue;
            }
            let missing = match self.data.get(&field.name) {
                None | Some(DatabaseValue::Null) => true,
                Some(DatabaseValue::String(text)) => text.trim().is_empty(),
                Some(_) => false,
            };
            if missing {
                errors.add(&field.name, "is required");
            }
        }

        for validator in self.schema.validators() {
            validator(self, &mut errors);
        }
        errors
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub(crate) fn set_errors(&mut self, errors: ValidationErrors) {
        self.errors = errors;
    }

    /// Start a new change-tracking cycle
    pub fn mark_clean(&mut self) {
        self.old_data.clear();
    }

    pub(crate) fn assign_primary_key(&mut self, value: DatabaseValue) {
        let primary_key = self.schema.primary_key().to_string();
        self.data.insert(primary_key, value);
    }

    /// Clear all state after a delete; the record must not be used again
    pub(crate) fn void(&mut self) {
        self.data.clear();
        self.extra_data.clear();
        self.old_data.clear();
        self.relations.clear();
        self.pending_links.clear();
        self.voided = true;
    }

    fn ensure_live(&self) -> OrmResult<()> {
        if self.voided {
            return Err(OrmError::Voided(self.schema.name().to_string()));
        }
        Ok(())
    }

    /// Columns and pass-through values as a JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .data
            .iter()
            .chain(self.extra_data.iter())
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.schema.name())
            .field("data", &self.data)
            .field("extra_data", &self.extra_data)
            .field("dirty", &self.old_data.keys().collect::<Vec<_>>())
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("voided", &self.voided)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.data == other.data
            && self.extra_data == other.extra_data
    }
}
