//! Tagged values accepted and returned by record field access

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};

use super::record::Record;

/// A value assigned to or read from a record field.
///
/// Built once at the API boundary; record internals match on the variant
/// instead of inspecting raw values.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Scalar(DatabaseValue),
    List(Vec<DatabaseValue>),
    Related(Box<Record>),
    RelatedList(Vec<Record>),
    /// Stored without type coercion, e.g. the `NOW()` sentinel on a date column
    Raw(String),
}

impl FieldValue {
    pub fn scalar<V: Into<DatabaseValue>>(value: V) -> Self {
        match value.into() {
            DatabaseValue::Null => FieldValue::Null,
            other => FieldValue::Scalar(other),
        }
    }

    pub fn raw(sql: &str) -> Self {
        FieldValue::Raw(sql.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_scalar(&self) -> Option<&DatabaseValue> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Scalar view used for columns and pass-through data
    pub fn into_scalar(self) -> OrmResult<DatabaseValue> {
        match self {
            FieldValue::Null => Ok(DatabaseValue::Null),
            FieldValue::Scalar(value) => Ok(value),
            FieldValue::Raw(sql) => Ok(DatabaseValue::String(sql)),
            FieldValue::List(values) => Ok(DatabaseValue::Json(serde_json::Value::Array(
                values.iter().map(DatabaseValue::to_json).collect(),
            ))),
            FieldValue::Related(_) | FieldValue::RelatedList(_) => Err(OrmError::invalid_argument(
                "A related record cannot be stored in a scalar field",
            )),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Scalar(_) => "scalar",
            FieldValue::List(_) => "list",
            FieldValue::Related(_) => "related record",
            FieldValue::RelatedList(_) => "list of related records",
            FieldValue::Raw(_) => "raw SQL",
        }
    }
}

macro_rules! scalar_field_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::scalar(value)
                }
            }
        )*
    };
}

scalar_field_value!(bool, i32, i64, u32, f64, String, &str, &String, Uuid, NaiveDateTime, NaiveDate);

impl From<DatabaseValue> for FieldValue {
    fn from(value: DatabaseValue) -> Self {
        FieldValue::scalar(value)
    }
}

impl From<Record> for FieldValue {
    fn from(record: Record) -> Self {
        FieldValue::Related(Box::new(record))
    }
}

impl From<Vec<Record>> for FieldValue {
    fn from(records: Vec<Record>) -> Self {
        FieldValue::RelatedList(records)
    }
}

impl From<Vec<DatabaseValue>> for FieldValue {
    fn from(values: Vec<DatabaseValue>) -> Self {
        FieldValue::List(values)
    }
}

macro_rules! list_field_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for FieldValue {
                fn from(values: Vec<$ty>) -> Self {
                    FieldValue::List(values.into_iter().map(DatabaseValue::from).collect())
                }
            }
        )*
    };
}

list_field_value!(i32, i64, String, &str, Uuid);

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => FieldValue::Null,
        }
    }
}

/// A resolved relation held in a record's cache.
///
/// `One(None)` means the relation was checked and no related row exists.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl RelationValue {
    pub fn one(&self) -> Option<&Record> {
        match self {
            RelationValue::One(record) => record.as_ref(),
            RelationValue::Many(records) => records.first(),
        }
    }

    pub fn many(&self) -> &[Record] {
        match self {
            RelationValue::One(Some(record)) => std::slice::from_ref(record),
            RelationValue::One(None) => &[],
            RelationValue::Many(records) => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            RelationValue::One(record) => record.into_iter().collect(),
            RelationValue::Many(records) => records,
        }
    }
}

impl From<RelationValue> for FieldValue {
    fn from(value: RelationValue) -> Self {
        match value {
            RelationValue::One(Some(record)) => FieldValue::Related(Box::new(record)),
            RelationValue::One(None) => FieldValue::Null,
            RelationValue::Many(records) => FieldValue::RelatedList(records),
        }
    }
}
