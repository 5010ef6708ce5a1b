//! Query Builder Types - Core types and enums for query building

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backends::Row;
use crate::conditions::Condition;
use crate::error::OrmError;
use super::builder::QueryBuilder;

/// Comparison operators accepted by condition clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    Is,
    IsNot,
}

impl QueryOperator {
    /// Operators whose meaning is negated (`<>`, `NOT LIKE`, `NOT IN`, `IS NOT`)
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            QueryOperator::NotEqual
                | QueryOperator::NotLike
                | QueryOperator::NotILike
                | QueryOperator::NotIn
                | QueryOperator::IsNot
        )
    }

    /// Whether a `*` wildcard in the value turns the clause into a LIKE match
    pub fn accepts_wildcard(&self) -> bool {
        matches!(
            self,
            QueryOperator::Equal
                | QueryOperator::NotEqual
                | QueryOperator::Like
                | QueryOperator::NotLike
                | QueryOperator::ILike
                | QueryOperator::NotILike
        )
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::NotEqual => write!(f, "<>"),
            QueryOperator::GreaterThan => write!(f, ">"),
            QueryOperator::GreaterThanOrEqual => write!(f, ">="),
            QueryOperator::LessThan => write!(f, "<"),
            QueryOperator::LessThanOrEqual => write!(f, "<="),
            QueryOperator::Like => write!(f, "LIKE"),
            QueryOperator::NotLike => write!(f, "NOT LIKE"),
            QueryOperator::ILike => write!(f, "ILIKE"),
            QueryOperator::NotILike => write!(f, "NOT ILIKE"),
            QueryOperator::In => write!(f, "IN"),
            QueryOperator::NotIn => write!(f, "NOT IN"),
            QueryOperator::Is => write!(f, "IS"),
            QueryOperator::IsNot => write!(f, "IS NOT"),
        }
    }
}

impl FromStr for QueryOperator {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "=" | "==" => Ok(QueryOperator::Equal),
            "!=" | "<>" => Ok(QueryOperator::NotEqual),
            ">" => Ok(QueryOperator::GreaterThan),
            ">=" => Ok(QueryOperator::GreaterThanOrEqual),
            "<" => Ok(QueryOperator::LessThan),
            "<=" => Ok(QueryOperator::LessThanOrEqual),
            "LIKE" => Ok(QueryOperator::Like),
            "NOT LIKE" => Ok(QueryOperator::NotLike),
            "ILIKE" => Ok(QueryOperator::ILike),
            "NOT ILIKE" => Ok(QueryOperator::NotILike),
            "IN" => Ok(QueryOperator::In),
            "NOT IN" => Ok(QueryOperator::NotIn),
            "IS" => Ok(QueryOperator::Is),
            "IS NOT" => Ok(QueryOperator::IsNot),
            _ => Err(OrmError::InvalidArgument(format!(
                "Unsupported operator '{}'",
                s
            ))),
        }
    }
}

/// How a clause is combined with its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl Boolean {
    /// Anything other than a literal "OR" is treated as AND
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("or") {
            Boolean::Or
        } else {
            Boolean::And
        }
    }
}

impl fmt::Display for Boolean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boolean::And => write!(f, "AND"),
            Boolean::Or => write!(f, "OR"),
        }
    }
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
            JoinType::Right => write!(f, "RIGHT JOIN"),
            JoinType::Cross => write!(f, "CROSS JOIN"),
        }
    }
}

/// What a join clause attaches: a table or an aliased sub-query
#[derive(Debug, Clone)]
pub enum JoinTarget {
    Table(String),
    Sub { query: Box<QueryBuilder>, alias: String },
}

/// Join clause with its ON conditions
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub target: JoinTarget,
    pub conditions: Vec<Condition>,
}

impl JoinClause {
    pub fn new(join_type: JoinType, table: &str) -> Self {
        Self {
            join_type,
            target: JoinTarget::Table(table.to_string()),
            conditions: Vec::new(),
        }
    }

    pub fn sub(join_type: JoinType, query: QueryBuilder, alias: &str) -> Self {
        Self {
            join_type,
            target: JoinTarget::Sub {
                query: Box::new(query),
                alias: alias.to_string(),
            },
            conditions: Vec::new(),
        }
    }

    /// Compare two columns in the ON clause
    pub fn on(mut self, first: &str, operator: &str, second: &str) -> Self {
        self.conditions
            .push(Condition::columns(first, operator, second, Boolean::And));
        self
    }

    pub fn or_on(mut self, first: &str, operator: &str, second: &str) -> Self {
        self.conditions
            .push(Condition::columns(first, operator, second, Boolean::Or));
        self
    }

    /// Compare a column with a bound value in the ON clause
    pub fn where_value<V: Into<crate::conditions::Operand>>(
        mut self,
        column: &str,
        operator: &str,
        value: V,
    ) -> Self {
        self.conditions
            .push(Condition::basic(column, operator, value, Boolean::And));
        self
    }
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for OrderDirection {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            _ => Err(OrmError::InvalidArgument(format!(
                "Order direction must be 'asc' or 'desc', got '{}'",
                s
            ))),
        }
    }
}

/// ORDER BY entry
#[derive(Debug, Clone)]
pub enum OrderClause {
    Column {
        column: String,
        direction: OrderDirection,
    },
    Raw {
        sql: String,
        bindings: Vec<crate::backends::DatabaseValue>,
    },
}

/// SELECT list entry
#[derive(Debug, Clone)]
pub enum SelectColumn {
    Column(String),
    Raw {
        sql: String,
        bindings: Vec<crate::backends::DatabaseValue>,
    },
    Sub {
        query: Box<QueryBuilder>,
        alias: String,
    },
}

/// FROM source
#[derive(Debug, Clone)]
pub enum FromSource {
    Table(String),
    Sub { query: Box<QueryBuilder>, alias: String },
}

/// UNION entry
#[derive(Debug, Clone)]
pub struct UnionClause {
    pub query: Box<QueryBuilder>,
    pub all: bool,
}

/// How result collections are keyed
#[derive(Clone)]
pub enum IndexBy {
    Column(String),
    Callback(Arc<dyn Fn(&Row) -> String + Send + Sync>),
}

impl IndexBy {
    pub fn key_for(&self, row: &Row, position: usize) -> String {
        match self {
            IndexBy::Column(column) => row
                .get(column)
                .map(|value| value.key_string())
                .unwrap_or_else(|| position.to_string()),
            IndexBy::Callback(callback) => callback(row),
        }
    }
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBy::Column(column) => write!(f, "IndexBy::Column({})", column),
            IndexBy::Callback(_) => write!(f, "IndexBy::Callback(..)"),
        }
    }
}

/// Aggregate functions supported by terminal aggregate operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_whitelist() {
        assert_eq!("<>".parse::<QueryOperator>().unwrap(), QueryOperator::NotEqual);
        assert_eq!("!=".parse::<QueryOperator>().unwrap(), QueryOperator::NotEqual);
        assert_eq!("not  like".parse::<QueryOperator>().unwrap(), QueryOperator::NotLike);
        assert!(matches!(
            "; DROP".parse::<QueryOperator>(),
            Err(OrmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_boolean_normalization() {
        assert_eq!(Boolean::parse("or"), Boolean::Or);
        assert_eq!(Boolean::parse("OR"), Boolean::Or);
        assert_eq!(Boolean::parse("xor"), Boolean::And);
        assert_eq!(Boolean::parse(""), Boolean::And);
    }

    #[test]
    fn test_order_direction_parsing() {
        assert_eq!("desc".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
        assert!(matches!(
            "sideways".parse::<OrderDirection>(),
            Err(OrmError::InvalidArgument(_))
        ));
    }
}
