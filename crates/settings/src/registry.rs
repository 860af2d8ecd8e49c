//! Section registry
//!
//! Host types become configuration sections through explicit registration:
//! `register::<T>("Key")` stores a descriptor that can produce the type's
//! default values as JSON (for seeding the script environment) and turn
//! post-execution JSON back into a typed instance (materialization).

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

/// Bound on host types usable as configuration sections
pub trait Section: Serialize + DeserializeOwned + Default + 'static {}

impl<T: Serialize + DeserializeOwned + Default + 'static> Section for T {}

/// Type-erased operations for one registered section type
pub(crate) trait SectionBinding {
    /// A default-valued instance for the placeholder map
    fn default_instance(&self) -> Box<dyn Any>;

    /// Default values as canonical JSON, for seeding the environment
    fn default_json(&self) -> Result<serde_json::Value>;

    /// Deserialize post-execution JSON into a fresh typed instance
    ///
    /// The incoming JSON is merged over the type's defaults first, so
    /// fields absent from the table keep their default even when a script
    /// replaced the whole section table. Unknown fields are dropped
    /// silently by serde.
    fn materialize(&self, json: serde_json::Value) -> Result<Box<dyn Any>>;
}

/// Overlay `overlay` onto `base`, recursing through objects
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

struct TypedBinding<T: Section> {
    _marker: PhantomData<T>,
}

impl<T: Section> SectionBinding for TypedBinding<T> {
    fn default_instance(&self) -> Box<dyn Any> {
        Box::new(T::default())
    }

    fn default_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(T::default())?)
    }

    fn materialize(&self, json: serde_json::Value) -> Result<Box<dyn Any>> {
        let mut merged = self.default_json()?;
        merge_json(&mut merged, json);
        let instance: T = serde_json::from_value(merged)?;
        Ok(Box::new(instance))
    }
}

/// One registered section: its key plus the type-erased binding
#[derive(Clone)]
pub(crate) struct SectionDescriptor {
    pub key: String,
    pub binding: Rc<dyn SectionBinding>,
}

/// Registry of all section descriptors, keyed by section key
#[derive(Default)]
pub(crate) struct SectionRegistry {
    descriptors: HashMap<String, SectionDescriptor>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host type under a section key
    pub fn register<T: Section>(&mut self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.descriptors.contains_key(&key) {
            return Err(Error::DuplicateSectionKey(key));
        }
        let descriptor = SectionDescriptor {
            key: key.clone(),
            binding: Rc::new(TypedBinding::<T> {
                _marker: PhantomData,
            }),
        };
        self.descriptors.insert(key, descriptor);
        Ok(())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SectionDescriptor> {
        self.descriptors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    struct WindowSettings {
        width: f64,
        height: f64,
    }

    #[test]
    fn test_register_and_seed_defaults() {
        let mut registry = SectionRegistry::new();
        registry.register::<WindowSettings>("WindowSettings").unwrap();
        assert_eq!(registry.descriptors().count(), 1);

        let descriptor = registry.descriptors().next().unwrap();
        let json = descriptor.binding.default_json().unwrap();
        assert_eq!(json["width"], 0.0);
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let mut registry = SectionRegistry::new();
        registry.register::<WindowSettings>("WindowSettings").unwrap();
        let err = registry
            .register::<WindowSettings>("WindowSettings")
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSectionKey(_)));
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct BufferSettings {
        capacity: f64,
        label: String,
    }

    impl Default for BufferSettings {
        fn default() -> Self {
            Self {
                capacity: 256.0,
                label: "default".to_string(),
            }
        }
    }

    #[test]
    fn test_materialize_keeps_defaults_for_missing_fields() {
        let mut registry = SectionRegistry::new();
        registry.register::<BufferSettings>("BufferSettings").unwrap();
        let descriptor = registry.descriptors().next().unwrap();

        // A script that replaced the whole table, mentioning only one field
        let json = serde_json::json!({ "label": "tuned" });
        let instance = descriptor.binding.materialize(json).unwrap();
        let settings = instance.downcast_ref::<BufferSettings>().unwrap();
        assert_eq!(settings.capacity, 256.0);
        assert_eq!(settings.label, "tuned");
    }

    #[test]
    fn test_materialize_drops_unknown_fields() {
        let mut registry = SectionRegistry::new();
        registry.register::<WindowSettings>("WindowSettings").unwrap();
        let descriptor = registry.descriptors().next().unwrap();

        let json = serde_json::json!({ "width": 800.0, "height": 600.0, "extra": "ignored" });
        let instance = descriptor.binding.materialize(json).unwrap();
        let settings = instance.downcast_ref::<WindowSettings>().unwrap();
        assert_eq!(settings.width, 800.0);
        assert_eq!(settings.height, 600.0);
    }
}
