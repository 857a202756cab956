//! The per-sandbox global record.

use realm_script::{PropertyDescriptor, PropertyMap, Value};
use realm_types::PropertyKey;
use std::collections::HashSet;

/// What the record says about one key.
#[derive(Debug, Clone)]
pub enum Slot {
    Value(PropertyDescriptor),
    /// Deleted locally while the host or endowments still have it.
    Deleted,
}

/// Every global write one application has made.
///
/// Holds values plus masking deletes. Only the membrane mutates it.
#[derive(Debug, Default)]
pub struct GlobalRecord {
    values: PropertyMap,
    masked: HashSet<PropertyKey>,
}

impl GlobalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// The local answer for `key`, or `None` if the record has no opinion.
    pub fn slot(&self, key: &PropertyKey) -> Option<Slot> {
        if let Some(descriptor) = self.values.get(key) {
            return Some(Slot::Value(descriptor.clone()));
        }
        self.masked.contains(key).then_some(Slot::Deleted)
    }

    /// Writes a value, clearing any mask. Returns `false` if a local
    /// read-only property refused it.
    pub fn write(&mut self, key: PropertyKey, value: Value) -> bool {
        self.masked.remove(&key);
        self.values.assign(key, value)
    }

    pub fn define(&mut self, key: PropertyKey, descriptor: PropertyDescriptor) {
        self.masked.remove(&key);
        self.values.define(key, descriptor);
    }

    /// Removes a local value. Returns whether one existed.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        self.values.remove(key).is_some()
    }

    /// Hides `key` from lower layers.
    pub fn mask(&mut self, key: PropertyKey) {
        self.values.remove(&key);
        self.masked.insert(key);
    }

    pub fn is_masked(&self, key: &PropertyKey) -> bool {
        self.masked.contains(key)
    }

    /// Enumerable local keys in write order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.values.enumerable_keys()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.masked.clear();
    }

    /// Number of local values (masks excluded).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.masked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_clears_mask() {
        let mut record = GlobalRecord::new();
        record.mask("fetch".into());
        assert!(matches!(record.slot(&"fetch".into()), Some(Slot::Deleted)));

        assert!(record.write("fetch".into(), Value::Number(1.0)));
        assert!(!record.is_masked(&"fetch".into()));
        assert!(matches!(record.slot(&"fetch".into()), Some(Slot::Value(_))));
    }

    #[test]
    fn unknown_key_has_no_slot() {
        let record = GlobalRecord::new();
        assert!(record.slot(&"x".into()).is_none());
        assert!(record.is_empty());
    }

    #[test]
    fn clear_drops_values_and_masks() {
        let mut record = GlobalRecord::new();
        record.write("a".into(), Value::Null);
        record.mask("b".into());
        record.clear();
        assert!(record.is_empty());
        assert!(record.slot(&"b".into()).is_none());
    }
}
