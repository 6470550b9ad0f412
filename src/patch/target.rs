//! Patchable targets: anything exposing named, replaceable attributes.

#![allow(missing_docs)]

use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::errors::{AlhError, Result};

/// Type-erased attribute value.
pub type PatchValue = Arc<dyn Any + Send + Sync>;

/// Wrap a value for storage in a target.
pub fn patch_value<V: Any + Send + Sync>(value: V) -> PatchValue {
    Arc::new(value)
}

/// An object whose named attributes can be read and swapped at runtime.
pub trait PatchTarget: Send + Sync {
    /// Name used in logs and errors.
    fn target_name(&self) -> &str;

    /// Current value of `attribute`.
    fn read_attr(&self, attribute: &str) -> Result<PatchValue>;

    /// Replace `attribute`, returning the previous value.
    fn write_attr(&self, attribute: &str, value: PatchValue) -> Result<PatchValue>;
}

/// The standard patch target: a named table of attributes.
///
/// Only attributes that already exist can be overridden, so a typo in a test
/// fails loudly instead of installing a value nobody reads.
pub struct AttributeTable {
    name: String,
    attrs: RwLock<BTreeMap<String, PatchValue>>,
}

impl AttributeTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Define or overwrite an attribute outside of any override scope.
    pub fn insert<V: Any + Send + Sync>(&self, attribute: impl Into<String>, value: V) {
        self.attrs.write().insert(attribute.into(), patch_value(value));
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.attrs.read().contains_key(attribute)
    }

    pub fn names(&self) -> Vec<String> {
        self.attrs.read().keys().cloned().collect()
    }

    /// Typed read of an attribute value.
    pub fn get<T: Any + Clone>(&self, attribute: &str) -> Result<T> {
        let value = self.read_attr(attribute)?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| AlhError::AttributeType {
                target: self.name.clone(),
                attribute: attribute.to_string(),
                expected: type_name::<T>(),
            })
    }
}

impl PatchTarget for AttributeTable {
    fn target_name(&self) -> &str {
        &self.name
    }

    fn read_attr(&self, attribute: &str) -> Result<PatchValue> {
        self.attrs
            .read()
            .get(attribute)
            .cloned()
            .ok_or_else(|| AlhError::NoAttribute {
                target: self.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    fn write_attr(&self, attribute: &str, value: PatchValue) -> Result<PatchValue> {
        let mut attrs = self.attrs.write();
        match attrs.get_mut(attribute) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(AlhError::NoAttribute {
                target: self.name.clone(),
                attribute: attribute.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for AttributeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeTable")
            .field("name", &self.name)
            .field("attributes", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_get_round_trips() {
        let table = AttributeTable::new("settings");
        table.insert("retries", 3_u32);
        assert_eq!(table.get::<u32>("retries").unwrap(), 3);
        assert!(table.contains("retries"));
    }

    #[test]
    fn wrong_type_is_reported() {
        let table = AttributeTable::new("settings");
        table.insert("retries", 3_u32);
        let err = table.get::<String>("retries").unwrap_err();
        assert_eq!(err.code(), "ALH-2202");
    }

    #[test]
    fn write_attr_requires_existing_attribute() {
        let table = AttributeTable::new("settings");
        let err = table.write_attr("missing", patch_value(1_u8)).unwrap_err();
        assert_eq!(err.code(), "ALH-2201");
        assert!(err.to_string().contains("settings"));
    }

    #[test]
    fn write_attr_returns_previous_value() {
        let table = AttributeTable::new("settings");
        table.insert("mode", "fast".to_string());
        let previous = table.write_attr("mode", patch_value("slow".to_string())).unwrap();
        assert_eq!(previous.downcast_ref::<String>().unwrap(), "fast");
        assert_eq!(table.get::<String>("mode").unwrap(), "slow");
    }
}
