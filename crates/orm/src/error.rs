//! Error types for the record layer
//!
//! Every hard failure surfaces as an [`OrmError`] and propagates to the caller.
//! Validation is the one soft path: it never produces an `OrmError`, the
//! record collects messages in [`ValidationErrors`] and `save()` returns `false`.

use indexmap::IndexMap;
use std::fmt;

/// Result type alias for record and query operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error taxonomy for the ORM
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrmError {
    /// Missing or incomplete named connection configuration, unknown adapter kind
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed condition, bad order direction, bad binding category, wrong relation value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The driver reported a failure while preparing or executing a statement
    #[error("Query failed [{code}]: {message}")]
    QueryFailed { code: String, message: String },

    /// Access to a relation that the model does not declare
    #[error("Relation '{relation}' is not declared on model '{model}'")]
    RelationNotFound { model: String, relation: String },

    /// Two collaborators registered the same extra field for one model
    #[error("Field '{field}' on model '{model}' is provided by both '{first}' and '{second}'")]
    DonorConflict {
        model: String,
        field: String,
        first: String,
        second: String,
    },

    /// A lookup that requires a row found none
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// The record was deleted and must not be reused
    #[error("Record of model '{0}' has been deleted")]
    Voided(String),

    /// A lifecycle observer failed for a reason other than a veto
    #[error("Observer failed: {0}")]
    Observer(String),
}

impl OrmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        OrmError::Configuration(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        OrmError::InvalidArgument(message.into())
    }

    pub fn query_failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::QueryFailed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn relation_not_found(model: &str, relation: &str) -> Self {
        OrmError::RelationNotFound {
            model: model.to_string(),
            relation: relation.to_string(),
        }
    }

    /// Driver error code for `QueryFailed`, `None` for every other variant
    pub fn driver_code(&self) -> Option<&str> {
        match self {
            OrmError::QueryFailed { code, .. } => Some(code),
            _ => None,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => OrmError::QueryFailed {
                code: db_err
                    .code()
                    .map(|code| code.into_owned())
                    .unwrap_or_else(|| "unknown".to_string()),
                message: db_err.message().to_string(),
            },
            sqlx::Error::Configuration(inner) => OrmError::Configuration(inner.to_string()),
            _ => OrmError::QueryFailed {
                code: "unknown".to_string(),
                message: err.to_string(),
            },
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::InvalidArgument(err.to_string())
    }
}

// Observer failures; vetoes are handled by the lifecycle before this conversion
impl From<crate::event_error::EventError> for OrmError {
    fn from(err: crate::event_error::EventError) -> Self {
        OrmError::Observer(err.to_string())
    }
}

// Convert from anyhow errors raised by collaborators
impl From<anyhow::Error> for OrmError {
    fn from(err: anyhow::Error) -> Self {
        OrmError::InvalidArgument(err.to_string())
    }
}

/// Per-field validation messages collected by `Record::validate`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    errors: IndexMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}
