//! Query Builder WHERE clause operations

use serde_json::Value as JsonValue;

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::DatabaseValue;
use crate::conditions::{Condition, Operand};

impl<M> QueryBuilder<M> {
    fn add_where(mut self, condition: Condition) -> Self {
        self.wheres.push(condition);
        self
    }

    fn add_checked_where(mut self, operator: &str, condition: Condition) -> Self {
        if let Err(e) = operator.parse::<QueryOperator>() {
            self.record_error(e);
            return self;
        }
        self.add_where(condition)
    }

    /// Add WHERE condition with equality.
    ///
    /// `Operand::Null` renders `IS NULL`, a list renders an inline `IN`, and a
    /// string containing `*` renders a `LIKE` with `*` as the wildcard.
    pub fn where_eq<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.add_where(Condition::basic(column, "=", value, Boolean::And))
    }

    pub fn or_where_eq<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.add_where(Condition::basic(column, "=", value, Boolean::Or))
    }

    /// Exact match on a key column, with no wildcard or list handling
    pub fn where_key(self, column: &str, value: DatabaseValue) -> Self {
        self.add_where(Condition::key(column, value))
    }

    /// Add WHERE condition with an explicit operator
    pub fn where_condition<V: Into<Operand>>(self, column: &str, operator: &str, value: V) -> Self {
        self.add_checked_where(operator, Condition::basic(column, operator, value, Boolean::And))
    }

    pub fn or_where_condition<V: Into<Operand>>(
        self,
        column: &str,
        operator: &str,
        value: V,
    ) -> Self {
        self.add_checked_where(operator, Condition::basic(column, operator, value, Boolean::Or))
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.where_condition(column, "<>", value)
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.where_condition(column, ">", value)
    }

    /// Add WHERE condition with greater than or equal
    pub fn where_gte<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.where_condition(column, ">=", value)
    }

    /// Add WHERE condition with less than
    pub fn where_lt<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.where_condition(column, "<", value)
    }

    /// Add WHERE condition with less than or equal
    pub fn where_lte<V: Into<Operand>>(self, column: &str, value: V) -> Self {
        self.where_condition(column, "<=", value)
    }

    /// Add WHERE condition with LIKE
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_condition(column, "LIKE", pattern)
    }

    /// Add WHERE condition with NOT LIKE
    pub fn where_not_like(self, column: &str, pattern: &str) -> Self {
        self.where_condition(column, "NOT LIKE", pattern)
    }

    /// Add a list of conditions as one parenthesized group
    pub fn where_conditions(self, conditions: Vec<Condition>, boolean: Boolean) -> Self {
        if conditions.is_empty() {
            return self;
        }
        self.add_where(Condition::group(conditions).with_boolean(boolean))
    }

    /// Add a semi-structured expression (see [`Condition::from_json`]) as one group
    pub fn where_expr(mut self, expression: &JsonValue, boolean: Boolean) -> Self {
        match Condition::from_json(expression) {
            Ok(conditions) => self.where_conditions(conditions, boolean),
            Err(e) => {
                self.record_error(e);
                self
            }
        }
    }

    /// Add a nested group built by a closure
    pub fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nested_where(build, Boolean::And)
    }

    pub fn or_where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nested_where(build, Boolean::Or)
    }

    fn nested_where<F>(mut self, build: F, boolean: Boolean) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let mut nested = build(QueryBuilder::new());
        if let Some(e) = nested.error.take() {
            self.record_error(e);
        }
        self.where_conditions(nested.wheres, boolean)
    }

    /// Compare a column with a correlated sub-select built by a closure
    pub fn where_sub<F>(self, column: &str, operator: &str, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.where_sub_query(column, operator, build(QueryBuilder::new()))
    }

    /// Compare a column with a sub-select
    pub fn where_sub_query<N>(self, column: &str, operator: &str, query: QueryBuilder<N>) -> Self {
        self.add_checked_where(
            operator,
            Condition::Sub {
                column: column.to_string(),
                operator: operator.to_string(),
                query: Box::new(query.cast()),
                boolean: Boolean::And,
            },
        )
    }

    pub fn or_where_sub_query<N>(self, column: &str, operator: &str, query: QueryBuilder<N>) -> Self {
        self.add_checked_where(
            operator,
            Condition::Sub {
                column: column.to_string(),
                operator: operator.to_string(),
                query: Box::new(query.cast()),
                boolean: Boolean::Or,
            },
        )
    }

    /// Add WHERE condition with IN; every member is bound.
    ///
    /// An empty list renders a predicate that matches nothing.
    pub fn where_in<V: Into<DatabaseValue>>(self, column: &str, values: Vec<V>) -> Self {
        self.add_in(column, values, false, Boolean::And)
    }

    pub fn or_where_in<V: Into<DatabaseValue>>(self, column: &str, values: Vec<V>) -> Self {
        self.add_in(column, values, false, Boolean::Or)
    }

    /// Add WHERE condition with NOT IN; an empty list also matches nothing
    pub fn where_not_in<V: Into<DatabaseValue>>(self, column: &str, values: Vec<V>) -> Self {
        self.add_in(column, values, true, Boolean::And)
    }

    pub fn or_where_not_in<V: Into<DatabaseValue>>(self, column: &str, values: Vec<V>) -> Self {
        self.add_in(column, values, true, Boolean::Or)
    }

    fn add_in<V: Into<DatabaseValue>>(
        self,
        column: &str,
        values: Vec<V>,
        not: bool,
        boolean: Boolean,
    ) -> Self {
        self.add_where(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            not,
            boolean,
        })
    }

    /// `column IN (sub-select)`
    pub fn where_in_sub<N>(self, column: &str, query: QueryBuilder<N>) -> Self {
        self.where_sub_query(column, "IN", query)
    }

    /// `column NOT IN (sub-select)`
    pub fn where_not_in_sub<N>(self, column: &str, query: QueryBuilder<N>) -> Self {
        self.where_sub_query(column, "NOT IN", query)
    }

    /// Add WHERE condition with IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.add_where(Condition::basic(column, "=", Operand::Null, Boolean::And))
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.add_where(Condition::basic(column, "=", Operand::Null, Boolean::Or))
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.add_where(Condition::basic(column, "<>", Operand::Null, Boolean::And))
    }

    pub fn or_where_not_null(self, column: &str) -> Self {
        self.add_where(Condition::basic(column, "<>", Operand::Null, Boolean::Or))
    }

    /// Add WHERE condition with BETWEEN
    pub fn where_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.add_between(column, low.into(), high.into(), false, Boolean::And)
    }

    pub fn or_where_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.add_between(column, low.into(), high.into(), false, Boolean::Or)
    }

    pub fn where_not_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.add_between(column, low.into(), high.into(), true, Boolean::And)
    }

    pub fn or_where_not_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.add_between(column, low.into(), high.into(), true, Boolean::Or)
    }

    fn add_between(
        self,
        column: &str,
        low: DatabaseValue,
        high: DatabaseValue,
        not: bool,
        boolean: Boolean,
    ) -> Self {
        self.add_where(Condition::Between {
            column: column.to_string(),
            low,
            high,
            not,
            boolean,
        })
    }

    /// Compare two columns
    pub fn where_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.add_checked_where(operator, Condition::columns(first, operator, second, Boolean::And))
    }

    pub fn or_where_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.add_checked_where(operator, Condition::columns(first, operator, second, Boolean::Or))
    }

    /// Add raw WHERE condition for complex cases; `?` marks consume `bindings`
    pub fn where_raw(self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.add_where(Condition::Raw {
            sql: sql.to_string(),
            bindings,
            boolean: Boolean::And,
        })
    }

    pub fn or_where_raw(self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.add_where(Condition::Raw {
            sql: sql.to_string(),
            bindings,
            boolean: Boolean::Or,
        })
    }

    /// Add EXISTS subquery condition
    pub fn where_exists<N>(self, query: QueryBuilder<N>) -> Self {
        self.add_exists(query, false, Boolean::And)
    }

    pub fn or_where_exists<N>(self, query: QueryBuilder<N>) -> Self {
        self.add_exists(query, false, Boolean::Or)
    }

    /// Add NOT EXISTS subquery condition
    pub fn where_not_exists<N>(self, query: QueryBuilder<N>) -> Self {
        self.add_exists(query, true, Boolean::And)
    }

    pub fn or_where_not_exists<N>(self, query: QueryBuilder<N>) -> Self {
        self.add_exists(query, true, Boolean::Or)
    }

    fn add_exists<N>(self, query: QueryBuilder<N>, not: bool, boolean: Boolean) -> Self {
        self.add_where(Condition::Exists {
            query: Box::new(query.cast()),
            not,
            boolean,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;
    use serde_json::json;

    #[test]
    fn test_invalid_operator_is_recorded() {
        let query = QueryBuilder::<()>::table("orders")
            .where_condition("total", "=>", 10i64)
            .where_eq("status", "paid");
        assert!(matches!(query.error(), Some(OrmError::InvalidArgument(_))));
        assert_eq!(query.wheres.len(), 1);
    }

    #[test]
    fn test_where_expr_groups_conditions() {
        let query = QueryBuilder::<()>::table("orders")
            .where_expr(&json!([["status", "paid"], ["total", ">", 10]]), Boolean::Or);
        assert!(matches!(
            &query.wheres[0],
            Condition::Group { children, boolean: Boolean::Or } if children.len() == 2
        ));
    }

    #[test]
    fn test_nested_group_propagates_errors() {
        let query = QueryBuilder::<()>::table("orders")
            .where_group(|q| q.where_condition("total", "<=>", 1i64));
        assert!(query.error().is_some());
    }
}
