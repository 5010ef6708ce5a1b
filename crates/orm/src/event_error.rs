use std::fmt;

use crate::error::OrmError;

/// Failure reported by a lifecycle observer.
///
/// `PropagationStopped` returned from a `before` hook vetoes the operation;
/// every other variant aborts it with [`OrmError::Observer`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    Validation {
        message: String,
        hint: Option<String>,
    },
    Database {
        message: String,
    },
    Observer {
        message: String,
    },
    PropagationStopped {
        reason: String,
    },
}

impl EventError {
    pub fn validation(message: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: &str, hint: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn database(message: &str) -> Self {
        Self::Database {
            message: message.to_string(),
        }
    }

    pub fn observer(message: &str) -> Self {
        Self::Observer {
            message: message.to_string(),
        }
    }

    /// Veto the operation the hook guards
    pub fn propagation_stopped(reason: &str) -> Self {
        Self::PropagationStopped {
            reason: reason.to_string(),
        }
    }

    pub fn is_veto(&self) -> bool {
        matches!(self, EventError::PropagationStopped { .. })
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Validation { message, hint } => {
                write!(f, "Validation error: {}", message)?;
                if let Some(hint) = hint {
                    write!(f, " (hint: {})", hint)?;
                }
                Ok(())
            }
            EventError::Database { message } => write!(f, "Database error: {}", message),
            EventError::Observer { message } => write!(f, "Observer error: {}", message),
            EventError::PropagationStopped { reason } => {
                write!(f, "Event propagation stopped: {}", reason)
            }
        }
    }
}

impl std::error::Error for EventError {}

// Observers that run queries of their own can use `?` on record operations
impl From<OrmError> for EventError {
    fn from(err: OrmError) -> Self {
        Self::database(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_validation_with_hint() {
        let error =
            EventError::validation_with_hint("Invalid email format", "Use format user@domain.com");

        match error {
            EventError::Validation { message, hint } => {
                assert_eq!(message, "Invalid email format");
                assert_eq!(hint.unwrap(), "Use format user@domain.com");
            }
            _ => panic!("Expected validation error"),
        }
    }

    #[test]
    fn test_only_propagation_stopped_is_a_veto() {
        assert!(EventError::propagation_stopped("read-only period").is_veto());
        assert!(!EventError::observer("audit sink down").is_veto());
        assert!(!EventError::validation("bad").is_veto());
    }

    #[test]
    fn test_event_error_display() {
        let error = EventError::propagation_stopped("User cancelled operation");
        assert_eq!(error.to_string(), "Event propagation stopped: User cancelled operation");
    }

    #[test]
    fn test_conversion_from_orm_error() {
        let event_error: EventError = OrmError::query_failed("23505", "duplicate key").into();

        match event_error {
            EventError::Database { message } => assert!(message.contains("duplicate key")),
            _ => panic!("Expected database error from OrmError conversion"),
        }
    }

    #[test]
    fn test_conversion_into_orm_error() {
        let error: OrmError = EventError::observer("audit sink down").into();
        assert_eq!(error, OrmError::Observer("Observer error: audit sink down".to_string()));
    }
}
