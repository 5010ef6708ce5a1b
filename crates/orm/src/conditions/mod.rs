//! Condition expressions
//!
//! A small closed AST for WHERE / HAVING / ON predicates. The fluent builder
//! produces [`Condition`] nodes directly; semi-structured input (bare strings,
//! JSON tuples and nested groups) is turned into the same nodes by
//! [`Condition::parse_str`] and [`Condition::from_json`]. Rendering lives in
//! [`parser`].

pub mod parser;

pub use parser::{ConditionParser, ParsedCondition, RelationJoin};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::query::{Boolean, QueryBuilder};

static SIMPLE_COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(<=|>=|<>|!=|=|<|>)\s*(.*?)\s*$")
        .expect("comparison pattern is valid")
});

static PLAIN_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("column pattern is valid"));

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Value(DatabaseValue),
    /// Bound as-is, never rewritten to `LIKE`
    Exact(DatabaseValue),
    /// Inline list, rendered as an escaped `IN (...)` literal list
    List(Vec<DatabaseValue>),
    /// Another column, quoted like the left-hand side
    Column(String),
    /// Verbatim SQL fragment
    Raw(String),
}

impl Operand {
    fn from_json(value: &JsonValue) -> OrmResult<Self> {
        match value {
            JsonValue::Null => Ok(Operand::Null),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Array(_) | JsonValue::Object(_) => Err(OrmError::InvalidArgument(
                        format!("IN list members must be scalars, got {}", item),
                    )),
                    other => Ok(DatabaseValue::from_json(other.clone())),
                })
                .collect::<OrmResult<Vec<_>>>()
                .map(Operand::List),
            other => Ok(Operand::Value(DatabaseValue::from_json(other.clone()))),
        }
    }
}

impl From<DatabaseValue> for Operand {
    fn from(value: DatabaseValue) -> Self {
        match value {
            DatabaseValue::Null => Operand::Null,
            other => Operand::Value(other),
        }
    }
}

macro_rules! operand_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::from(DatabaseValue::from(value))
                }
            }
        )*
    };
}

operand_from_scalar!(
    bool,
    i32,
    i64,
    u32,
    f64,
    String,
    &str,
    &String,
    uuid::Uuid,
    chrono::NaiveDateTime,
    chrono::NaiveDate,
    &DatabaseValue
);

impl<T: Into<DatabaseValue>> From<Option<T>> for Operand {
    fn from(value: Option<T>) -> Self {
        Operand::from(DatabaseValue::from(value))
    }
}

impl<T: Into<DatabaseValue>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand::List(values.into_iter().map(Into::into).collect())
    }
}

/// A predicate node
#[derive(Debug, Clone)]
pub enum Condition {
    /// `column <op> operand`, with the null / list / wildcard value policy applied at render time
    Basic {
        column: String,
        operator: String,
        value: Operand,
        boolean: Boolean,
    },
    /// `column [NOT] IN (...)` with every member bound as a parameter
    In {
        column: String,
        values: Vec<DatabaseValue>,
        not: bool,
        boolean: Boolean,
    },
    Between {
        column: String,
        low: DatabaseValue,
        high: DatabaseValue,
        not: bool,
        boolean: Boolean,
    },
    /// Parenthesized group of conditions
    Group {
        children: Vec<Condition>,
        boolean: Boolean,
    },
    /// `column <op> (sub-select)`
    Sub {
        column: String,
        operator: String,
        query: Box<QueryBuilder>,
        boolean: Boolean,
    },
    Exists {
        query: Box<QueryBuilder>,
        not: bool,
        boolean: Boolean,
    },
    /// Verbatim SQL; `?` marks consume `bindings` in order.
    ///
    /// Never build this from user input.
    Raw {
        sql: String,
        bindings: Vec<DatabaseValue>,
        boolean: Boolean,
    },
}

impl Condition {
    pub fn basic<V: Into<Operand>>(column: &str, operator: &str, value: V, boolean: Boolean) -> Self {
        Condition::Basic {
            column: column.to_string(),
            operator: operator.to_string(),
            value: value.into(),
            boolean,
        }
    }

    /// Implicit equality
    pub fn eq<V: Into<Operand>>(column: &str, value: V) -> Self {
        Self::basic(column, "=", value, Boolean::And)
    }

    /// Exact equality for key columns; `*` in the value is not a wildcard
    pub fn key(column: &str, value: DatabaseValue) -> Self {
        let value = match value {
            DatabaseValue::Null => Operand::Null,
            other => Operand::Exact(other),
        };
        Self::basic(column, "=", value, Boolean::And)
    }

    pub fn op<V: Into<Operand>>(column: &str, operator: &str, value: V) -> Self {
        Self::basic(column, operator, value, Boolean::And)
    }

    /// Column-to-column comparison
    pub fn columns(first: &str, operator: &str, second: &str, boolean: Boolean) -> Self {
        Condition::Basic {
            column: first.to_string(),
            operator: operator.to_string(),
            value: Operand::Column(second.to_string()),
            boolean,
        }
    }

    pub fn group(children: Vec<Condition>) -> Self {
        Condition::Group {
            children,
            boolean: Boolean::And,
        }
    }

    pub fn raw(sql: &str) -> Self {
        Condition::Raw {
            sql: sql.to_string(),
            bindings: Vec::new(),
            boolean: Boolean::And,
        }
    }

    /// Same condition, combined with OR
    pub fn or(self) -> Self {
        self.with_boolean(Boolean::Or)
    }

    pub fn with_boolean(mut self, new_boolean: Boolean) -> Self {
        match &mut self {
            Condition::Basic { boolean, .. }
            | Condition::In { boolean, .. }
            | Condition::Between { boolean, .. }
            | Condition::Group { boolean, .. }
            | Condition::Sub { boolean, .. }
            | Condition::Exists { boolean, .. }
            | Condition::Raw { boolean, .. } => *boolean = new_boolean,
        }
        self
    }

    pub fn boolean(&self) -> Boolean {
        match self {
            Condition::Basic { boolean, .. }
            | Condition::In { boolean, .. }
            | Condition::Between { boolean, .. }
            | Condition::Group { boolean, .. }
            | Condition::Sub { boolean, .. }
            | Condition::Exists { boolean, .. }
            | Condition::Raw { boolean, .. } => *boolean,
        }
    }

    /// Parse a bare `column <op> value` string.
    ///
    /// Strings without a recognizable comparison become raw SQL. Do not pass
    /// user input here.
    pub fn parse_str(expression: &str) -> Self {
        let Some(captures) = SIMPLE_COMPARISON.captures(expression) else {
            return Condition::raw(expression);
        };

        let column = &captures[1];
        let operator = &captures[2];
        let value = parse_literal(&captures[3]);

        if is_raw_column(column) {
            return Condition::raw(expression);
        }
        Condition::basic(column, operator, value, Boolean::And)
    }

    /// Parse a semi-structured expression.
    ///
    /// Accepted shapes:
    /// - `"age >= 18"` (see [`Condition::parse_str`])
    /// - `{"status": "paid", "deleted_at": null}` (implicit equality per key)
    /// - `["status", "paid"]`, `["age", ">=", 18]`, `["age", ">=", 18, "OR"]`
    /// - a list of any of the above
    /// - `[[...tuples], "OR"]` or `[[...tuples], null, null, "OR"]` for a nested group
    pub fn from_json(expression: &JsonValue) -> OrmResult<Vec<Condition>> {
        match expression {
            JsonValue::String(s) => Ok(vec![Condition::parse_str(s)]),
            JsonValue::Object(map) => map
                .iter()
                .map(|(column, value)| clause_from_parts(column, "=", value, Boolean::And))
                .collect(),
            JsonValue::Array(items) if is_tuple(items) => Ok(vec![clause_from_json(expression)?]),
            JsonValue::Array(items) => items.iter().map(clause_from_json).collect(),
            other => Err(OrmError::InvalidArgument(format!(
                "Unsupported condition expression: {}",
                other
            ))),
        }
    }
}

/// `RAW` / `SQL` columns carry verbatim SQL in their value
pub(crate) fn is_raw_column(column: &str) -> bool {
    column.eq_ignore_ascii_case("raw") || column.eq_ignore_ascii_case("sql")
}

/// A list starting with a plain column name is one tuple, not a list of clauses
fn is_tuple(items: &[JsonValue]) -> bool {
    let Some(JsonValue::String(first)) = items.first() else {
        return false;
    };
    (2..=4).contains(&items.len()) && PLAIN_COLUMN.is_match(first)
}

fn clause_from_json(clause: &JsonValue) -> OrmResult<Condition> {
    match clause {
        JsonValue::String(s) => Ok(Condition::parse_str(s)),
        JsonValue::Object(_) => Ok(Condition::group(Condition::from_json(clause)?)),
        JsonValue::Array(items) => match items.first() {
            Some(first @ JsonValue::Array(_)) | Some(first @ JsonValue::Object(_)) => {
                let boolean_slot = items
                    .get(3)
                    .or_else(|| if items.len() == 2 { items.get(1) } else { None });
                let boolean = boolean_slot
                    .and_then(JsonValue::as_str)
                    .map(Boolean::parse)
                    .unwrap_or_default();
                Ok(Condition::group(Condition::from_json(first)?).with_boolean(boolean))
            }
            Some(JsonValue::String(column)) => {
                let (operator, value, boolean) = match items.len() {
                    2 => ("=", &items[1], Boolean::And),
                    3 => (tuple_operator(&items[1])?, &items[2], Boolean::And),
                    4 => (
                        tuple_operator(&items[1])?,
                        &items[2],
                        items[3].as_str().map(Boolean::parse).unwrap_or_default(),
                    ),
                    n => {
                        return Err(OrmError::InvalidArgument(format!(
                            "Condition tuple for '{}' must have 2 to 4 elements, got {}",
                            column, n
                        )))
                    }
                };
                clause_from_parts(column, operator, value, boolean)
            }
            _ => Err(OrmError::InvalidArgument(format!(
                "Malformed condition clause: {}",
                clause
            ))),
        },
        other => Err(OrmError::InvalidArgument(format!(
            "Malformed condition clause: {}",
            other
        ))),
    }
}

fn tuple_operator(value: &JsonValue) -> OrmResult<&str> {
    value.as_str().ok_or_else(|| {
        OrmError::InvalidArgument(format!("Condition operator must be a string, got {}", value))
    })
}

fn clause_from_parts(
    column: &str,
    operator: &str,
    value: &JsonValue,
    boolean: Boolean,
) -> OrmResult<Condition> {
    if is_raw_column(column) {
        let sql = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(Condition::Raw {
            sql,
            bindings: Vec::new(),
            boolean,
        });
    }
    Ok(Condition::Basic {
        column: column.to_string(),
        operator: operator.to_string(),
        value: Operand::from_json(value)?,
        boolean,
    })
}

/// Literal on the right of a bare string comparison
fn parse_literal(text: &str) -> Operand {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return Operand::Null;
    }
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            let inner = &trimmed[1..trimmed.len() - 1];
            return Operand::Value(DatabaseValue::String(
                inner.replace(&format!("{}{}", quote, quote), &quote.to_string()),
            ));
        }
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Operand::Value(DatabaseValue::Int64(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Operand::Value(DatabaseValue::Float64(f));
    }
    Operand::Value(DatabaseValue::String(trimmed.to_string()))
}
