//! Query Builder ORDER BY, GROUP BY, HAVING operations

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::DatabaseValue;
use crate::conditions::{Condition, Operand};

impl<M> QueryBuilder<M> {
    /// Add ORDER BY clause; `direction` is `asc` or `desc` in any case
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        match direction.parse::<OrderDirection>() {
            Ok(direction) => self.orders.push(OrderClause::Column {
                column: column.to_string(),
                direction,
            }),
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Add ORDER BY clause (ascending)
    pub fn order_by_asc(mut self, column: &str) -> Self {
        self.orders.push(OrderClause::Column {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        });
        self
    }

    /// Add ORDER BY clause (descending)
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.orders.push(OrderClause::Column {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        });
        self
    }

    /// Add a raw ORDER BY expression
    pub fn order_by_raw(mut self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.orders.push(OrderClause::Raw {
            sql: sql.to_string(),
            bindings,
        });
        self
    }

    /// Drop every ORDER BY entry
    pub fn reorder(mut self) -> Self {
        self.orders.clear();
        self
    }

    /// Add GROUP BY columns; `columns` is comma separated
    pub fn group_by(mut self, columns: &str) -> Self {
        self.groups.extend(
            columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        self
    }

    /// Add HAVING clause, same grammar as `where_condition`
    pub fn having<V: Into<Operand>>(self, column: &str, operator: &str, value: V) -> Self {
        self.add_having(operator, Condition::basic(column, operator, value, Boolean::And))
    }

    pub fn or_having<V: Into<Operand>>(self, column: &str, operator: &str, value: V) -> Self {
        self.add_having(operator, Condition::basic(column, operator, value, Boolean::Or))
    }

    /// Add raw HAVING condition; `?` marks consume `bindings`
    pub fn having_raw(mut self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.havings.push(Condition::Raw {
            sql: sql.to_string(),
            bindings,
            boolean: Boolean::And,
        });
        self
    }

    pub fn or_having_raw(mut self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.havings.push(Condition::Raw {
            sql: sql.to_string(),
            bindings,
            boolean: Boolean::Or,
        });
        self
    }

    fn add_having(mut self, operator: &str, condition: Condition) -> Self {
        match operator.parse::<QueryOperator>() {
            Ok(_) => self.havings.push(condition),
            Err(e) => self.record_error(e),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;

    #[test]
    fn test_invalid_direction_is_recorded() {
        let query = QueryBuilder::<()>::table("orders").order_by("id", "down");
        assert!(matches!(query.error(), Some(OrmError::InvalidArgument(_))));
        assert!(query.orders.is_empty());
    }

    #[test]
    fn test_group_by_splits_columns() {
        let query = QueryBuilder::<()>::table("orders").group_by("status, customer_id");
        assert_eq!(query.groups, vec!["status".to_string(), "customer_id".to_string()]);
    }
}
