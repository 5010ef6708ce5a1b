//! Record lifecycle events and the observer trait

use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;

use crate::event_error::EventError;
use crate::model::{FieldValue, Record};

/// Hook points of the record lifecycle.
///
/// Every `before` event may veto its operation by returning
/// [`EventError::PropagationStopped`]; `after` events are fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Validating,
    Validated,
    SettingData,
    DataSet,
}

impl RecordEvent {
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::Saving | Self::Creating | Self::Updating | Self::Deleting | Self::Validating | Self::SettingData
        )
    }

    /// Hook name as used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Saving => "before_save",
            Self::Saved => "after_save",
            Self::Creating => "before_insert",
            Self::Created => "after_insert",
            Self::Updating => "before_update",
            Self::Updated => "after_update",
            Self::Deleting => "before_delete",
            Self::Deleted => "after_delete",
            Self::Validating => "before_validate",
            Self::Validated => "after_validate",
            Self::SettingData => "before_set_data",
            Self::DataSet => "after_set_data",
        }
    }
}

impl fmt::Display for RecordEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives lifecycle events of records.
///
/// All methods default to doing nothing, so an observer only implements the
/// hooks it cares about.
#[async_trait]
pub trait RecordObserver: Send + Sync {
    async fn saving(&self, _record: &mut Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn saved(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn creating(&self, _record: &mut Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn created(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn updating(&self, _record: &mut Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn updated(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleting(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleted(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    async fn validating(&self, _record: &mut Record) -> Result<(), EventError> {
        Ok(())
    }

    /// Runs after validation; failures are in `record.errors()`
    async fn validated(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    /// May rewrite the incoming values before a bulk assignment
    async fn setting_data(
        &self,
        _record: &Record,
        _data: &mut IndexMap<String, FieldValue>,
    ) -> Result<(), EventError> {
        Ok(())
    }

    async fn data_set(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelSchema, SqlType};
    use std::sync::{Arc, Mutex};

    fn order() -> Record {
        Record::new(Arc::new(
            ModelSchema::new("Order", "orders").column("status", SqlType::Varchar(32)),
        ))
    }

    struct StatusStamp {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecordObserver for StatusStamp {
        async fn creating(&self, record: &mut Record) -> Result<(), EventError> {
            record.set("status", "new").map_err(EventError::from)?;
            self.seen.lock().unwrap().push("creating".to_string());
            Ok(())
        }

        async fn setting_data(
            &self,
            _record: &Record,
            data: &mut IndexMap<String, FieldValue>,
        ) -> Result<(), EventError> {
            data.shift_remove("internal_flag");
            Ok(())
        }
    }

    #[test]
    fn test_before_and_after_events() {
        assert!(RecordEvent::Saving.is_before());
        assert!(RecordEvent::SettingData.is_before());
        assert!(!RecordEvent::Deleted.is_before());
        assert_eq!(RecordEvent::Creating.to_string(), "before_insert");
        assert_eq!(RecordEvent::Validated.name(), "after_validate");
    }

    #[tokio::test]
    async fn test_before_hook_can_modify_record() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = StatusStamp { seen: Arc::clone(&seen) };
        let mut record = order();

        observer.creating(&mut record).await.unwrap();

        assert_eq!(record.get("status").unwrap(), FieldValue::from("new"));
        assert_eq!(*seen.lock().unwrap(), vec!["creating".to_string()]);
    }

    #[tokio::test]
    async fn test_unimplemented_hooks_are_no_ops() {
        let observer = StatusStamp {
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let mut record = order();

        assert!(observer.saving(&mut record).await.is_ok());
        assert!(observer.deleted(&record).await.is_ok());
        assert!(!record.is_dirty("status"));
    }

    #[tokio::test]
    async fn test_setting_data_filters_input() {
        let observer = StatusStamp {
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let record = order();
        let mut data = IndexMap::new();
        data.insert("status".to_string(), FieldValue::from("paid"));
        data.insert("internal_flag".to_string(), FieldValue::from(true));

        observer.setting_data(&record, &mut data).await.unwrap();

        assert_eq!(data.len(), 1);
        assert!(data.contains_key("status"));
    }
}
