//! Junction tables of many-to-many relations
//!
//! Link rows are diffed, never replaced: rows present before and after a
//! sync are left untouched, so extra columns on them survive.

use indexmap::IndexMap;

use super::metadata::RelationDescriptor;
use super::naming::{junction_keys, junction_table_name};
use crate::backends::{DatabaseValue, SqlDialect};
use crate::conditions::Condition;
use crate::connection::{Adapter, InsertOptions};
use crate::error::OrmResult;
use crate::query::Boolean;
use crate::schema::{ModelSchema, SqlType};
use crate::security::quote_identifier;

/// Discriminator column holding the owning field name
pub const NAME_COLUMN: &str = "name";

/// Outcome of [`Junction::sync`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub added: Vec<DatabaseValue>,
    pub removed: Vec<DatabaseValue>,
}

impl SyncResult {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Physical layout of one relation's junction table
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    table: String,
    owner_key: String,
    related_key: String,
    owner_key_type: SqlType,
    related_key_type: SqlType,
    /// Field name stored in the discriminator column, if the relation uses one
    slot: Option<String>,
}

impl Junction {
    /// Layout for relation `field` of `owner` pointing at `target`.
    ///
    /// `prefix` is the owner connection's table prefix.
    pub fn for_relation(
        owner: &ModelSchema,
        field: &str,
        descriptor: &RelationDescriptor,
        target: &ModelSchema,
        prefix: &str,
    ) -> Self {
        let table = match &descriptor.junction_table {
            Some(table) => format!("{}{}", prefix, table),
            None => junction_table_name(
                &format!("{}{}", prefix, owner.table()),
                &format!("{}{}", prefix, target.table()),
                prefix,
            ),
        };
        let (owner_key, related_key) =
            junction_keys(owner.table(), owner.primary_key(), target.table(), target.primary_key());

        Self {
            table,
            owner_key,
            related_key,
            owner_key_type: key_type(owner),
            related_key_type: key_type(target),
            slot: descriptor.discriminated.then(|| field.to_string()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn related_key(&self) -> &str {
        &self.related_key
    }

    pub fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    /// Surrogate key, both foreign keys and the optional discriminator
    pub fn column_definitions(&self, dialect: SqlDialect) -> Vec<String> {
        let mut columns = vec![
            dialect.auto_increment_key("id"),
            format!(
                "{} {} NOT NULL",
                quote_identifier(&self.owner_key, dialect),
                self.owner_key_type.ddl(dialect)
            ),
            format!(
                "{} {} NOT NULL",
                quote_identifier(&self.related_key, dialect),
                self.related_key_type.ddl(dialect)
            ),
        ];
        if self.slot.is_some() {
            columns.push(format!(
                "{} {} NOT NULL",
                quote_identifier(NAME_COLUMN, dialect),
                SqlType::Varchar(64).ddl(dialect)
            ));
        }
        columns
    }

    /// Conditions selecting the link rows of one owner
    pub fn owner_conditions(&self, owner_id: &DatabaseValue) -> Vec<Condition> {
        let mut conditions = vec![Condition::key(&self.owner_key, owner_id.clone())];
        if let Some(slot) = &self.slot {
            conditions.push(Condition::key(NAME_COLUMN, DatabaseValue::from(slot.as_str())));
        }
        conditions
    }

    pub async fn ensure_table(&self, adapter: &Adapter) -> OrmResult<()> {
        if adapter.table_exists(&self.table).await? {
            return Ok(());
        }
        tracing::debug!(table = self.table.as_str(), "creating junction table");
        adapter
            .create_table(&self.table, &self.column_definitions(adapter.dialect()))
            .await
    }

    /// Related ids currently linked to `owner_id`
    pub async fn linked_ids(&self, adapter: &Adapter, owner_id: &DatabaseValue) -> OrmResult<Vec<DatabaseValue>> {
        let query = crate::query::QueryBuilder::<()>::table(&self.table)
            .select(&self.related_key)
            .where_conditions(self.owner_conditions(owner_id), Boolean::And);
        let compiled = crate::sql::SqlCompiler::new(adapter.dialect()).compile(&query)?;
        let rows = adapter.fetch(&compiled).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(&self.related_key).cloned())
            .collect())
    }

    /// Make the links of `owner_id` equal `ids`.
    ///
    /// Removed links go in one DELETE, new links in one multi-row INSERT.
    /// The table is created on first use.
    pub async fn sync(&self, adapter: &Adapter, owner_id: &DatabaseValue, ids: &[DatabaseValue]) -> OrmResult<SyncResult> {
        self.ensure_table(adapter).await?;
        let current = self.linked_ids(adapter, owner_id).await?;
        let result = diff(&current, ids);

        if !result.removed.is_empty() {
            let mut conditions = self.owner_conditions(owner_id);
            conditions.push(Condition::In {
                column: self.related_key.clone(),
                values: result.removed.clone(),
                not: false,
                boolean: Boolean::And,
            });
            adapter.delete(&self.table, &conditions).await?;
        }

        if !result.added.is_empty() {
            let rows: Vec<IndexMap<String, DatabaseValue>> = result
                .added
                .iter()
                .map(|id| {
                    let mut row = IndexMap::new();
                    row.insert(self.owner_key.clone(), owner_id.clone());
                    row.insert(self.related_key.clone(), id.clone());
                    if let Some(slot) = &self.slot {
                        row.insert(NAME_COLUMN.to_string(), DatabaseValue::from(slot.as_str()));
                    }
                    row
                })
                .collect();
            adapter.insert(&self.table, &rows, &InsertOptions::new()).await?;
        }

        tracing::debug!(
            table = self.table.as_str(),
            added = result.added.len(),
            removed = result.removed.len(),
            "synced junction rows"
        );
        Ok(result)
    }
}

fn key_type(schema: &ModelSchema) -> SqlType {
    schema
        .field_descriptor(schema.primary_key())
        .map(|field| field.sql_type)
        .unwrap_or(SqlType::BigInt)
}

/// Ids to add and remove so `current` becomes `wanted`; duplicates and empty ids are dropped
fn diff(current: &[DatabaseValue], wanted: &[DatabaseValue]) -> SyncResult {
    let current_keys: Vec<String> = current.iter().map(DatabaseValue::key_string).collect();
    let mut wanted_keys: Vec<String> = Vec::new();
    let mut added = Vec::new();

    for id in wanted.iter().filter(|id| !id.is_empty()) {
        let key = id.key_string();
        if wanted_keys.contains(&key) {
            continue;
        }
        if !current_keys.contains(&key) {
            added.push(id.clone());
        }
        wanted_keys.push(key);
    }

    let removed = current
        .iter()
        .zip(&current_keys)
        .filter(|(_, key)| !wanted_keys.contains(key))
        .map(|(id, _)| id.clone())
        .collect();

    SyncResult { added, removed }
}
