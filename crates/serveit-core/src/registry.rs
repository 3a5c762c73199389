//! Named, read-only JSON snapshots served under `/info/{name}`.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
};

use serde_json::Value;
use thiserror::Error;

use crate::{callback::Model, payload::Payload, serializer::into_json};

/// Name the model's own attributes are registered under.
pub const MODEL_INFO_NAME: &str = "model";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("an info endpoint named `{0}` is already registered")]
    Duplicate(String),
}

/// Map from info name to the snapshot taken when it was registered.
///
/// Registration normally happens before traffic starts, but the lock makes
/// late registrations safe against concurrent lookups.
#[derive(Debug, Default)]
pub struct InfoRegistry {
    entries: RwLock<HashMap<String, Arc<Value>>>,
}

impl InfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `data` now and serve that snapshot under `name` from then on.
    /// A name can only be registered once.
    pub fn register(
        &self,
        name: impl Into<String>,
        data: impl Into<Payload>,
    ) -> Result<Arc<Value>, RegistryError> {
        let name = name.into();
        // Serialization runs caller code, so it happens before the lock is taken.
        let snapshot = Arc::new(into_json(data.into()));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        entries.insert(name, snapshot.clone());
        Ok(snapshot)
    }

    /// Register the model's attributes, each serialized on its own, under
    /// [`MODEL_INFO_NAME`].
    pub fn register_model(&self, model: &dyn Model) -> Result<Arc<Value>, RegistryError> {
        self.register(MODEL_INFO_NAME, Payload::Map(model.attributes()))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Value>> {
        self.read().get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Each write is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Value>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fmt,
        panic::{AssertUnwindSafe, catch_unwind},
    };

    use ndarray::arr1;
    use serde_json::json;

    use super::*;
    use crate::payload::Opaque;

    #[derive(Debug)]
    struct Unprintable;

    impl fmt::Display for Unprintable {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display is not supported")
        }
    }

    impl Opaque for Unprintable {}

    struct Stump;

    impl Model for Stump {
        fn attributes(&self) -> Vec<(String, Payload)> {
            vec![
                ("threshold".into(), Payload::from(json!(0.5))),
                ("coef_".into(), Payload::from(arr1(&[1.0, -1.0]).into_dyn())),
            ]
        }
    }

    #[test]
    fn unknown_names_are_absent() {
        let registry = InfoRegistry::new();
        assert!(registry.lookup("features").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn registered_data_is_served_as_a_snapshot() {
        let registry = InfoRegistry::new();
        registry
            .register("features", json!(["a", "b", "c"]))
            .unwrap();
        assert_eq!(
            registry.lookup("features").as_deref(),
            Some(&json!(["a", "b", "c"]))
        );
    }

    #[test]
    fn data_is_serialized_at_registration() {
        let registry = InfoRegistry::new();
        registry
            .register("weights", arr1(&[1_i64, 2, 3]).into_dyn())
            .unwrap();
        assert_eq!(*registry.lookup("weights").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = InfoRegistry::new();
        registry.register("labels", json!(["x"])).unwrap();
        let err = registry.register("labels", json!(["y"])).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "labels"));
        assert_eq!(*registry.lookup("labels").unwrap(), json!(["x"]));
    }

    #[test]
    fn model_attributes_register_under_reserved_name() {
        let registry = InfoRegistry::new();
        registry.register_model(&Stump).unwrap();
        assert_eq!(
            *registry.lookup(MODEL_INFO_NAME).unwrap(),
            json!({"threshold": 0.5, "coef_": [1.0, -1.0]})
        );
        assert_eq!(registry.names(), vec!["model".to_owned()]);
    }

    #[test]
    fn panicking_serialization_leaves_registry_usable() {
        let registry = InfoRegistry::new();
        registry.register_model(&Stump).unwrap();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            registry.register("broken", Payload::object(Unprintable))
        }));
        assert!(outcome.is_err());

        assert!(registry.lookup(MODEL_INFO_NAME).is_some());
        assert!(registry.lookup("broken").is_none());
        registry.register("features", json!(["a"])).unwrap();
        assert_eq!(registry.names(), vec!["features".to_owned(), "model".to_owned()]);
    }

    #[test]
    fn poisoned_lock_still_serves_snapshots() {
        let registry = InfoRegistry::new();
        registry.register("labels", json!(["x"])).unwrap();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = registry.entries.write().unwrap();
            panic!("writer died");
        }));
        assert!(registry.entries.is_poisoned());

        assert_eq!(*registry.lookup("labels").unwrap(), json!(["x"]));
        assert_eq!(registry.len(), 1);
        registry.register("weights", json!([1])).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
