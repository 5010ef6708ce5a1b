//! Observer registration and event dispatch

use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::{OrmError, OrmResult};
use crate::event_error::EventError;
use crate::events::{RecordEvent, RecordObserver};
use crate::model::{FieldValue, Model, Record};

const GLOBAL: &str = "*";

/// Observers keyed by model name; global observers run first
#[derive(Default)]
pub struct ObserverManager {
    observers: DashMap<String, Vec<Arc<dyn RecordObserver>>>,
}

impl ObserverManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe records of the model named `model`
    pub fn register_for(&self, model: &str, observer: Arc<dyn RecordObserver>) {
        self.observers.entry(model.to_string()).or_default().push(observer);
    }

    pub fn register_for_model<M: Model>(&self, observer: Arc<dyn RecordObserver>) {
        self.register_for(M::schema().name(), observer);
    }

    /// Observe records of every model
    pub fn register_global(&self, observer: Arc<dyn RecordObserver>) {
        self.register_for(GLOBAL, observer);
    }

    pub fn has_observers_for(&self, model: &str) -> bool {
        self.observer_count(model) > 0
    }

    /// Observers that see `model`'s events, globals included
    pub fn observer_count(&self, model: &str) -> usize {
        self.observers_for(model).len()
    }

    pub fn clear(&self) {
        self.observers.clear();
    }

    fn observers_for(&self, model: &str) -> Vec<Arc<dyn RecordObserver>> {
        let mut observers: Vec<Arc<dyn RecordObserver>> = self
            .observers
            .get(GLOBAL)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if model != GLOBAL {
            if let Some(entry) = self.observers.get(model) {
                observers.extend(entry.value().iter().cloned());
            }
        }
        observers
    }

    /// Run a `before` hook on every observer.
    ///
    /// Returns `Ok(false)` when an observer vetoes; any other observer
    /// failure aborts the operation.
    pub async fn before(&self, event: RecordEvent, record: &mut Record) -> OrmResult<bool> {
        for observer in self.observers_for(record.model_name()) {
            let result = match event {
                RecordEvent::Saving => observer.saving(record).await,
                RecordEvent::Creating => observer.creating(record).await,
                RecordEvent::Updating => observer.updating(record).await,
                RecordEvent::Deleting => observer.deleting(record).await,
                RecordEvent::Validating => observer.validating(record).await,
                _ => {
                    return Err(OrmError::invalid_argument(format!(
                        "'{}' is not a before hook with a record argument",
                        event
                    )))
                }
            };
            if !Self::continue_after(event, record.model_name(), result)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run the `before_set_data` hook; observers may rewrite `data`
    pub async fn setting_data(&self, record: &Record, data: &mut IndexMap<String, FieldValue>) -> OrmResult<bool> {
        for observer in self.observers_for(record.model_name()) {
            let result = observer.setting_data(record, data).await;
            if !Self::continue_after(RecordEvent::SettingData, record.model_name(), result)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run an `after` hook; failures are logged and otherwise ignored
    pub async fn after(&self, event: RecordEvent, record: &Record) {
        for observer in self.observers_for(record.model_name()) {
            let result = match event {
                RecordEvent::Saved => observer.saved(record).await,
                RecordEvent::Created => observer.created(record).await,
                RecordEvent::Updated => observer.updated(record).await,
                RecordEvent::Deleted => observer.deleted(record).await,
                RecordEvent::Validated => observer.validated(record).await,
                RecordEvent::DataSet => observer.data_set(record).await,
                _ => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(model = record.model_name(), hook = event.name(), "observer failed: {}", e);
            }
        }
    }

    fn continue_after(event: RecordEvent, model: &str, result: Result<(), EventError>) -> OrmResult<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_veto() => {
                tracing::debug!(model, hook = event.name(), "operation vetoed: {}", e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ObserverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<(String, usize)> = self
            .observers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();
        f.debug_struct("ObserverManager").field("observers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelSchema, SqlType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn record(model: &str) -> Record {
        Record::new(Arc::new(
            ModelSchema::new(model, "orders").column("status", SqlType::Varchar(32)),
        ))
    }

    struct Tracker {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecordObserver for Tracker {
        async fn saving(&self, _record: &mut Record) -> Result<(), EventError> {
            self.log.lock().unwrap().push(format!("{}:saving", self.label));
            Ok(())
        }

        async fn saved(&self, _record: &Record) -> Result<(), EventError> {
            self.log.lock().unwrap().push(format!("{}:saved", self.label));
            Err(EventError::observer("audit sink down"))
        }
    }

    struct Veto;

    #[async_trait]
    impl RecordObserver for Veto {
        async fn deleting(&self, _record: &Record) -> Result<(), EventError> {
            Err(EventError::propagation_stopped("orders are archived, not deleted"))
        }

        async fn updating(&self, _record: &mut Record) -> Result<(), EventError> {
            Err(EventError::validation("totals are locked"))
        }
    }

    #[tokio::test]
    async fn test_global_observers_run_first() {
        let manager = ObserverManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_for("Order", Arc::new(Tracker { label: "order", log: Arc::clone(&log) }));
        manager.register_global(Arc::new(Tracker { label: "global", log: Arc::clone(&log) }));

        let mut order = record("Order");
        assert!(manager.before(RecordEvent::Saving, &mut order).await.unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["global:saving", "order:saving"]);

        let mut customer = record("Customer");
        manager.before(RecordEvent::Saving, &mut customer).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(manager.observer_count("Order"), 2);
        assert_eq!(manager.observer_count("Customer"), 1);
    }

    #[tokio::test]
    async fn test_veto_and_failure() {
        let manager = ObserverManager::new();
        manager.register_for("Order", Arc::new(Veto));
        let mut order = record("Order");

        assert!(!manager.before(RecordEvent::Deleting, &mut order).await.unwrap());
        assert!(matches!(
            manager.before(RecordEvent::Updating, &mut order).await,
            Err(OrmError::Observer(_))
        ));
        assert!(manager.before(RecordEvent::Saving, &mut order).await.unwrap());
    }

    #[tokio::test]
    async fn test_after_hook_failures_are_swallowed() {
        let manager = ObserverManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.register_for("Order", Arc::new(Tracker { label: "first", log: Arc::clone(&log) }));
        manager.register_for("Order", Arc::new(Tracker { label: "second", log: Arc::clone(&log) }));

        manager.after(RecordEvent::Saved, &record("Order")).await;

        assert_eq!(*log.lock().unwrap(), vec!["first:saved", "second:saved"]);
    }

    #[tokio::test]
    async fn test_after_event_is_not_a_before_hook() {
        let manager = ObserverManager::new();
        manager.register_global(Arc::new(Veto));
        let mut order = record("Order");

        assert!(matches!(
            manager.before(RecordEvent::Saved, &mut order).await,
            Err(OrmError::InvalidArgument(_))
        ));
    }
}
