//! Database context
//!
//! [`Database`] bundles everything records and queries need at run time:
//! the named connection registry, the schema registry, the identity map,
//! lifecycle observers and the text import filter. It is cheap to clone and
//! clones share all state.

use std::sync::Arc;

use crate::backends::{Connector, DatabaseValue, PostgresConnector, Row};
use crate::conditions::RelationJoin;
use crate::config::{ConnectionConfig, DatabaseConfig, DEFAULT_CONNECTION};
use crate::connection::{Adapter, AggregatedStats, ConnectionRegistry};
use crate::error::OrmResult;
use crate::model::{ImportFilter, Model, PassThrough, Record};
use crate::observers::ObserverManager;
use crate::query::QueryBuilder;
use crate::relationships::{IdentityMap, RelationKind};
use crate::schema::{FieldDescriptor, ModelSchema, SchemaRegistry};

/// Supplies the acting user for `created_by` / `updated_by` columns
pub type CurrentUser = Arc<dyn Fn() -> Option<DatabaseValue> + Send + Sync>;

/// Shared run-time context of the mapping layer
#[derive(Clone)]
pub struct Database {
    connections: Arc<ConnectionRegistry>,
    schemas: Arc<SchemaRegistry>,
    identity_map: Arc<IdentityMap>,
    observers: Arc<ObserverManager>,
    import_filter: Arc<dyn ImportFilter>,
    current_user: Option<CurrentUser>,
}

impl Database {
    /// Context over `config` with the PostgreSQL connector registered
    pub fn new(config: DatabaseConfig) -> Self {
        let connections = ConnectionRegistry::new(config);
        connections.register_connector(Arc::new(PostgresConnector::new()));
        Self {
            connections: Arc::new(connections),
            schemas: Arc::new(SchemaRegistry::new()),
            identity_map: Arc::new(IdentityMap::new()),
            observers: Arc::new(ObserverManager::new()),
            import_filter: Arc::new(PassThrough),
            current_user: None,
        }
    }

    /// Configuration from `DB_URL` / `DB_<NAME>_URL`
    pub fn from_env() -> OrmResult<Self> {
        Ok(Self::new(DatabaseConfig::from_env()?))
    }

    /// Single `default` connection from a database URL
    pub fn from_url(database_url: &str) -> OrmResult<Self> {
        let config = DatabaseConfig::new().with_connection(DEFAULT_CONNECTION, ConnectionConfig::from_url(database_url)?);
        Ok(Self::new(config))
    }

    /// Serve another adapter kind, or replace the built-in PostgreSQL driver
    pub fn with_connector(self, connector: Arc<dyn Connector>) -> Self {
        self.connections.register_connector(connector);
        self
    }

    pub fn with_import_filter(mut self, filter: Arc<dyn ImportFilter>) -> Self {
        self.import_filter = filter;
        self
    }

    pub fn with_current_user<F>(mut self, current_user: F) -> Self
    where
        F: Fn() -> Option<DatabaseValue> + Send + Sync + 'static,
    {
        self.current_user = Some(Arc::new(current_user));
        self
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// Add a donor field to `model`; cached records of the model are dropped
    /// so none is served with the old schema
    pub fn register_extra_field(&self, model: &str, donor: &str, field: FieldDescriptor) -> OrmResult<()> {
        self.schemas.register_extra_field(model, donor, field)?;
        self.identity_map.invalidate_model(model);
        Ok(())
    }

    pub fn observers(&self) -> &ObserverManager {
        &self.observers
    }

    /// The acting user, if a callback was installed and it knows one
    pub fn current_user(&self) -> Option<DatabaseValue> {
        self.current_user.as_ref().and_then(|current_user| current_user())
    }

    pub fn schema<M: Model>(&self) -> Arc<ModelSchema> {
        self.schemas.schema::<M>()
    }

    pub fn table_prefix(&self, connection: &str) -> OrmResult<&str> {
        self.connections.table_prefix(connection)
    }

    /// Physical table of a schema: the connection's prefix plus the logical name
    pub fn table_name(&self, schema: &ModelSchema) -> OrmResult<String> {
        Ok(format!("{}{}", self.table_prefix(schema.connection())?, schema.table()))
    }

    /// Adapter over a named connection, connecting on first use
    pub async fn adapter(&self, connection: &str) -> OrmResult<Adapter> {
        Ok(Adapter::new(self.connections.connection(connection).await?))
    }

    pub async fn adapter_for(&self, schema: &ModelSchema) -> OrmResult<Adapter> {
        self.adapter(schema.connection()).await
    }

    /// Empty record using this context's import filter
    pub fn new_record(&self, schema: Arc<ModelSchema>) -> Record {
        Record::new(schema).with_import_filter(Arc::clone(&self.import_filter))
    }

    /// Record loaded from a row
    pub fn hydrate(&self, schema: &Arc<ModelSchema>, row: Row) -> Record {
        Record::from_row(Arc::clone(schema), row).with_import_filter(Arc::clone(&self.import_filter))
    }

    /// Untyped query on the `default` connection
    pub fn table(&self, table: &str) -> QueryBuilder {
        QueryBuilder::table(table)
    }

    /// Query over a model's table, selecting its columns.
    ///
    /// BELONGS_TO and HAS_ONE relations can be referenced in conditions
    /// and ordering as `relation.column`; they are joined on demand.
    pub fn query<M: Model>(&self) -> OrmResult<QueryBuilder<M>> {
        Ok(self.query_for(&self.schema::<M>())?.cast())
    }

    pub fn query_for(&self, schema: &ModelSchema) -> OrmResult<QueryBuilder> {
        let table = self.table_name(schema)?;
        Ok(QueryBuilder::table(&table)
            .select(&format!("{}.*", table))
            .on_connection(schema.connection())
            .with_relation_joins(self.relation_joins(schema, &table)?))
    }

    fn relation_joins(&self, schema: &ModelSchema, base: &str) -> OrmResult<Vec<RelationJoin>> {
        let mut joins = Vec::new();
        for (name, descriptor) in schema.relations() {
            let (local_column, foreign_column) = match descriptor.kind {
                RelationKind::BelongsTo => {
                    let target = self.schemas.resolve(descriptor.target_type(), descriptor.target_schema_fn());
                    (descriptor.local_key_column(), target.primary_key().to_string())
                }
                RelationKind::HasOne => (schema.primary_key().to_string(), descriptor.foreign_key_column(schema)),
                RelationKind::HasMany | RelationKind::ManyToMany => continue,
            };
            let target = self.schemas.resolve(descriptor.target_type(), descriptor.target_schema_fn());
            joins.push(RelationJoin {
                name: name.to_string(),
                table: self.table_name(&target)?,
                local_column: format!("{}.{}", base, local_column),
                foreign_column,
            });
        }
        Ok(joins)
    }

    /// Run a query and hydrate every row as a record of `schema`
    pub async fn fetch_records(&self, schema: &Arc<ModelSchema>, query: &QueryBuilder) -> OrmResult<Vec<Record>> {
        Ok(query
            .all(self)
            .await?
            .into_iter()
            .map(|row| self.hydrate(schema, row))
            .collect())
    }

    /// Record by primary key, served from the identity map when cached
    pub async fn find_record(&self, schema: &Arc<ModelSchema>, key: &DatabaseValue) -> OrmResult<Option<Record>> {
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(record) = self.identity_map.get(schema.name(), key) {
            return Ok(Some(record));
        }

        let query = self
            .query_for(schema)?
            .where_key(schema.primary_key(), key.clone())
            .limit(1);
        let record = self.fetch_records(schema, &query).await?.into_iter().next();
        if let Some(record) = &record {
            self.identity_map.store(record);
        }
        Ok(record)
    }

    /// Raw SQL on the `default` connection; `?` marks take `bindings`
    pub async fn raw(&self, sql: &str, bindings: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        self.adapter(DEFAULT_CONNECTION).await?.raw(sql, bindings).await
    }

    /// Close a named connection; the next use reconnects
    pub async fn close(&self, connection: &str) -> OrmResult<bool> {
        self.connections.close(connection).await
    }

    pub async fn close_all(&self) -> OrmResult<()> {
        self.connections.close_all().await
    }

    pub async fn stats(&self) -> AggregatedStats {
        AggregatedStats::from_connections(&self.connections.stats().await)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.connections)
            .field("identity_map", &self.identity_map.len())
            .field("observers", &self.observers)
            .field("current_user", &self.current_user.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseBackendType;
    use crate::schema::SqlType;
    use crate::sql::SqlCompiler;

    fn database() -> Database {
        let config = DatabaseConfig::new()
            .with_connection(
                DEFAULT_CONNECTION,
                ConnectionConfig::new(DatabaseBackendType::PostgreSQL, "shop").with_table_prefix("shop_"),
            )
            .with_connection("archive", ConnectionConfig::new(DatabaseBackendType::PostgreSQL, "archive"));
        Database::new(config)
    }

    #[test]
    fn test_table_name_applies_connection_prefix() {
        let db = database();
        let orders = ModelSchema::new("Order", "orders");
        assert_eq!(db.table_name(&orders).unwrap(), "shop_orders");

        let archived = ModelSchema::new("ArchivedOrder", "orders").on_connection("archive");
        assert_eq!(db.table_name(&archived).unwrap(), "orders");

        let unknown = ModelSchema::new("Ghost", "ghosts").on_connection("missing");
        assert!(db.table_name(&unknown).is_err());
    }

    #[test]
    fn test_query_for_selects_model_columns() {
        let db = database();
        let schema = ModelSchema::new("Order", "orders").column("status", SqlType::Varchar(32));
        let query = db.query_for(&schema).unwrap().where_eq("status", "paid");
        let compiled = SqlCompiler::new(crate::backends::SqlDialect::PostgreSQL)
            .compile(&query)
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT shop_orders.* FROM shop_orders WHERE (shop_orders.status = :status1)"
        );
        assert_eq!(query.connection_name(), DEFAULT_CONNECTION);
    }

    #[test]
    fn test_current_user_callback() {
        let db = database();
        assert_eq!(db.current_user(), None);
        let db = db.with_current_user(|| Some(DatabaseValue::Int64(42)));
        assert_eq!(db.current_user(), Some(DatabaseValue::Int64(42)));
    }
}
