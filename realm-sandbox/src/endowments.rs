//! Host-injected properties shared by every sandbox.

use realm_script::{PropertyDescriptor, PropertyMap, Value};
use realm_types::PropertyKey;
use std::rc::Rc;

/// A read-only set of globals the host hands to a sandbox.
///
/// Built once, then frozen; clones share storage so many sandboxes can
/// receive the identical values.
#[derive(Debug, Clone, Default)]
pub struct EndowmentSet {
    props: Rc<PropertyMap>,
}

impl EndowmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new set with `key` added.
    pub fn with(self, key: impl Into<PropertyKey>, value: Value) -> Self {
        let mut props = Rc::unwrap_or_clone(self.props);
        props.define(
            key.into(),
            PropertyDescriptor {
                value,
                writable: false,
                enumerable: true,
                configurable: false,
            },
        );
        Self {
            props: Rc::new(props),
        }
    }

    pub fn get(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.props.get(key)
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.props.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.props.keys()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}
