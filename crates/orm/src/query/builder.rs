//! Query Builder - Core builder implementation

use std::fmt;
use std::marker::PhantomData;

use super::types::*;
use crate::conditions::{Condition, RelationJoin};
use crate::config::DEFAULT_CONNECTION;
use crate::error::OrmError;
use crate::security::split_alias;
use crate::sql::Bindings;

/// Query builder for constructing SELECT queries.
///
/// Fluent methods consume and return the builder; terminal operations borrow
/// it, so one builder can be executed any number of times. Argument errors
/// (a bad operator, an unknown binding category) are remembered and reported
/// when the query is compiled.
pub struct QueryBuilder<M = ()> {
    pub(crate) columns: Vec<SelectColumn>,
    pub(crate) distinct: bool,
    pub(crate) from: Vec<FromSource>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) wheres: Vec<Condition>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Condition>,
    pub(crate) orders: Vec<OrderClause>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) unions: Vec<UnionClause>,
    pub(crate) bindings: Bindings,
    pub(crate) index_by: Option<IndexBy>,
    pub(crate) relation_joins: Vec<RelationJoin>,
    pub(crate) connection: Option<String>,
    pub(crate) error: Option<OrmError>,
    _phantom: PhantomData<M>,
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            distinct: self.distinct,
            from: self.from.clone(),
            joins: self.joins.clone(),
            wheres: self.wheres.clone(),
            groups: self.groups.clone(),
            havings: self.havings.clone(),
            orders: self.orders.clone(),
            limit: self.limit,
            offset: self.offset,
            unions: self.unions.clone(),
            bindings: self.bindings.clone(),
            index_by: self.index_by.clone(),
            relation_joins: self.relation_joins.clone(),
            connection: self.connection.clone(),
            error: self.error.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<M> fmt::Debug for QueryBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("columns", &self.columns)
            .field("distinct", &self.distinct)
            .field("from", &self.from)
            .field("joins", &self.joins)
            .field("wheres", &self.wheres)
            .field("groups", &self.groups)
            .field("havings", &self.havings)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("unions", &self.unions)
            .field("index_by", &self.index_by)
            .finish()
    }
}

impl<M> Default for QueryBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> QueryBuilder<M> {
    /// Create a new query builder
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            distinct: false,
            from: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            bindings: Bindings::new(),
            index_by: None,
            relation_joins: Vec::new(),
            connection: None,
            error: None,
            _phantom: PhantomData,
        }
    }

    /// Shorthand for `QueryBuilder::new().from(table)`
    pub fn table(table: &str) -> Self {
        Self::new().from(table)
    }

    /// Reinterpret the builder for another row type, keeping all state
    pub fn cast<N>(self) -> QueryBuilder<N> {
        QueryBuilder {
            columns: self.columns,
            distinct: self.distinct,
            from: self.from,
            joins: self.joins,
            wheres: self.wheres,
            groups: self.groups,
            havings: self.havings,
            orders: self.orders,
            limit: self.limit,
            offset: self.offset,
            unions: self.unions,
            bindings: self.bindings,
            index_by: self.index_by,
            relation_joins: self.relation_joins,
            connection: self.connection,
            error: self.error,
            _phantom: PhantomData,
        }
    }

    /// Untyped copy, as used for sub-queries
    pub fn untyped(&self) -> QueryBuilder {
        self.clone().cast()
    }

    /// Declare to-one relations that conditions may reference as `relation.column`
    pub fn with_relation_joins(mut self, relations: Vec<RelationJoin>) -> Self {
        self.relation_joins = relations;
        self
    }

    /// Run terminal operations on a named connection instead of `default`
    pub fn on_connection(mut self, name: &str) -> Self {
        self.connection = Some(name.to_string());
        self
    }

    pub fn connection_name(&self) -> &str {
        self.connection.as_deref().unwrap_or(DEFAULT_CONNECTION)
    }

    /// Name used to qualify bare columns: the alias or name of the first FROM table
    pub fn base_alias(&self) -> Option<String> {
        match self.from.first()? {
            FromSource::Table(table) => Some(
                split_alias(table)
                    .map(|(_, alias)| alias.to_string())
                    .unwrap_or_else(|| table.trim().to_string()),
            ),
            FromSource::Sub { alias, .. } => Some(alias.clone()),
        }
    }

    /// First argument error recorded by a fluent call
    pub fn error(&self) -> Option<&OrmError> {
        self.error.as_ref()
    }

    pub(crate) fn record_error(&mut self, error: OrmError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_alias() {
        assert_eq!(QueryBuilder::<()>::table("orders").base_alias().as_deref(), Some("orders"));
        assert_eq!(QueryBuilder::<()>::table("orders AS o").base_alias().as_deref(), Some("o"));
        assert_eq!(QueryBuilder::<()>::new().base_alias(), None);
    }

    #[test]
    fn test_first_error_is_kept() {
        let mut query = QueryBuilder::<()>::new();
        query.record_error(OrmError::invalid_argument("first"));
        query.record_error(OrmError::invalid_argument("second"));
        assert_eq!(query.error(), Some(&OrmError::invalid_argument("first")));
    }
}
