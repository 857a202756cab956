//! The interception membrane.
//!
//! A [`Membrane`] is the object a sandboxed application sees as its global.
//! Reads consult three layers in order: the sandbox's own
//! [`GlobalRecord`], the host's [`EndowmentSet`], then the real host global.
//! Writes only ever land in the record. Deleting a key that a lower layer
//! still provides leaves a mask in the record, so the key reads as absent
//! for this sandbox only.

use realm_host::SELF_REFERENCE_KEYS;
use realm_script::{
    Function, FunctionRef, ObjectRef, PropertyDescriptor, ScriptError, ScriptObject, Value,
};
use realm_types::{PropertyKey, SandboxId};
use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

use crate::config::{InactiveWrites, SandboxOptions};
use crate::endowments::EndowmentSet;
use crate::record::{GlobalRecord, Slot};

/// How a membrane treats reads and writes.
#[derive(Debug, Clone)]
pub struct MembranePolicy {
    pub strict: bool,
    pub speedy: bool,
    pub inactive_writes: InactiveWrites,
    pub rebind: HashSet<String>,
}

impl From<&SandboxOptions> for MembranePolicy {
    fn from(options: &SandboxOptions) -> Self {
        Self {
            strict: options.strict,
            speedy: options.speedy,
            inactive_writes: options.inactive_writes,
            rebind: options.rebind.iter().cloned().collect(),
        }
    }
}

impl Default for MembranePolicy {
    fn default() -> Self {
        Self::from(&SandboxOptions::default())
    }
}

/// Which layer answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Local,
    Endowment,
    Host,
    /// `window`, `self` or `globalThis`, answered with the membrane itself.
    SelfReference,
}

/// The effective property behind a key.
#[derive(Debug, Clone)]
pub struct Described {
    pub layer: Layer,
    pub descriptor: PropertyDescriptor,
}

pub struct Membrane {
    id: SandboxId,
    record: RefCell<GlobalRecord>,
    endowments: EndowmentSet,
    host: ObjectRef,
    policy: MembranePolicy,
    active: Cell<bool>,
    /// Host function and its host-bound copy, per rebound key.
    bound: RefCell<HashMap<PropertyKey, (FunctionRef, FunctionRef)>>,
    /// Speedy-mode memo of frozen host properties.
    frozen: RefCell<HashMap<PropertyKey, Value>>,
    this: Weak<Membrane>,
}

impl Membrane {
    pub fn new(
        id: SandboxId,
        endowments: EndowmentSet,
        host: ObjectRef,
        policy: MembranePolicy,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id,
            record: RefCell::new(GlobalRecord::new()),
            endowments,
            host,
            policy,
            active: Cell::new(false),
            bound: RefCell::new(HashMap::new()),
            frozen: RefCell::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn policy(&self) -> &MembranePolicy {
        &self.policy
    }

    pub fn endowments(&self) -> &EndowmentSet {
        &self.endowments
    }

    /// The membrane as a script object.
    pub fn object(self: &Rc<Self>) -> ObjectRef {
        self.clone()
    }

    pub fn value(self: &Rc<Self>) -> Value {
        Value::Object(self.object())
    }

    pub fn record(&self) -> Ref<'_, GlobalRecord> {
        self.record.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    /// Drops rebind and speedy caches.
    pub fn clear_caches(&self) {
        self.bound.borrow_mut().clear();
        self.frozen.borrow_mut().clear();
    }

    /// Discards every local write and masking delete.
    pub fn clear_record(&self) {
        let mut record = self.record.borrow_mut();
        debug!(sandbox_id = %self.id, entries = record.len(), "global record cleared");
        record.clear();
    }

    /// Reports the effective descriptor for `key` and the layer that supplied it.
    pub fn describe(&self, key: &PropertyKey) -> Option<Described> {
        match self.record.borrow().slot(key) {
            Some(Slot::Value(descriptor)) => {
                return Some(Described {
                    layer: Layer::Local,
                    descriptor,
                });
            }
            Some(Slot::Deleted) => return None,
            None => {}
        }
        if is_self_key(key) {
            let descriptor = PropertyDescriptor::data(self.self_value()?);
            return Some(Described {
                layer: Layer::SelfReference,
                descriptor,
            });
        }
        if let Some(descriptor) = self.endowments.get(key) {
            return Some(Described {
                layer: Layer::Endowment,
                descriptor: descriptor.clone(),
            });
        }
        let mut descriptor = self.host.descriptor(key)?;
        descriptor.value = self.host_value(key)?;
        Some(Described {
            layer: Layer::Host,
            descriptor,
        })
    }

    fn self_value(&self) -> Option<Value> {
        let this: ObjectRef = self.this.upgrade()?;
        Some(Value::Object(this))
    }

    fn host_value(&self, key: &PropertyKey) -> Option<Value> {
        if self.policy.speedy {
            if let Some(value) = self.frozen.borrow().get(key) {
                trace!(sandbox_id = %self.id, %key, "speedy hit");
                return Some(value.clone());
            }
        }
        let descriptor = self.host.descriptor(key)?;
        let value = self.rebound(key, descriptor.value.clone());
        if self.policy.speedy && descriptor.is_frozen() {
            self.frozen.borrow_mut().insert(key.clone(), value.clone());
        }
        Some(value)
    }

    /// Applies the rebinding allow-list to a host value.
    fn rebound(&self, key: &PropertyKey, value: Value) -> Value {
        let Value::Function(original) = &value else {
            return value;
        };
        if !key.as_name().is_some_and(|name| self.policy.rebind.contains(name)) {
            return value;
        }
        if let Some((cached, bound)) = self.bound.borrow().get(key) {
            if Rc::ptr_eq(cached, original) {
                return Value::Function(Rc::clone(bound));
            }
        }
        let bound = Function::bind(original, Value::Object(self.host.clone()));
        debug!(sandbox_id = %self.id, %key, "host function rebound");
        self.bound
            .borrow_mut()
            .insert(key.clone(), (Rc::clone(original), Rc::clone(&bound)));
        Value::Function(bound)
    }

    fn inactive_write(&self, key: &PropertyKey) -> Result<(), ScriptError> {
        match self.policy.inactive_writes {
            InactiveWrites::Ignore => {
                debug!(sandbox_id = %self.id, %key, "write while inactive ignored");
                Ok(())
            }
            InactiveWrites::Reject => Err(ScriptError::Inactive(key.to_string())),
        }
    }

    fn host_read_only(&self, key: &PropertyKey) -> bool {
        !is_self_key(key)
            && self
                .host
                .descriptor(key)
                .is_some_and(|descriptor| !descriptor.writable)
    }

    fn host_non_configurable(&self, key: &PropertyKey) -> bool {
        self.host
            .descriptor(key)
            .is_some_and(|descriptor| !descriptor.configurable)
    }
}

fn is_self_key(key: &PropertyKey) -> bool {
    key.as_name()
        .is_some_and(|name| SELF_REFERENCE_KEYS.contains(&name))
}

impl ScriptObject for Membrane {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        match self.record.borrow().slot(key) {
            Some(Slot::Value(descriptor)) => return Some(descriptor.value),
            Some(Slot::Deleted) => return None,
            None => {}
        }
        if is_self_key(key) {
            return self.self_value();
        }
        if let Some(descriptor) = self.endowments.get(key) {
            return Some(descriptor.value.clone());
        }
        trace!(sandbox_id = %self.id, %key, "host fallback");
        self.host_value(key)
    }

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
        if !self.is_active() {
            return self.inactive_write(&key);
        }
        let local = matches!(self.record.borrow().slot(&key), Some(Slot::Value(_)));
        if !local && self.host_read_only(&key) {
            if self.policy.strict {
                debug!(sandbox_id = %self.id, %key, "write to read only host global rejected");
                return Err(ScriptError::ReadOnlyProperty(key.to_string()));
            }
            debug!(sandbox_id = %self.id, %key, "write to read only host global absorbed");
        }
        debug!(sandbox_id = %self.id, %key, "global write");
        if self.record.borrow_mut().write(key.clone(), value) {
            Ok(())
        } else {
            Err(ScriptError::ReadOnlyProperty(key.to_string()))
        }
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError> {
        if !self.is_active() {
            self.inactive_write(key)?;
            return Ok(!self.has(key));
        }
        let mut record = self.record.borrow_mut();
        record.delete(key);
        let below = is_self_key(key) || self.endowments.contains(key) || self.host.has(key);
        if !below {
            return Ok(true);
        }
        if self.policy.strict && !self.endowments.contains(key) && self.host_non_configurable(key)
        {
            debug!(sandbox_id = %self.id, %key, "delete of non-configurable host global refused");
            return Ok(false);
        }
        debug!(sandbox_id = %self.id, %key, "masking delete");
        record.mask(key.clone());
        Ok(true)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        match self.record.borrow().slot(key) {
            Some(Slot::Value(_)) => return true,
            Some(Slot::Deleted) => return false,
            None => {}
        }
        is_self_key(key) || self.endowments.contains(key) || self.host.has(key)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        let record = self.record.borrow();
        let mut seen = HashSet::new();
        let local = record.keys().cloned();
        let endowed = self.endowments.keys().cloned();
        let host = self.host.keys().into_iter().filter(|key| !record.is_masked(key));
        local
            .chain(endowed.filter(|key| !record.is_masked(key)))
            .chain(host)
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }

    fn descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.describe(key).map(|described| described.descriptor)
    }

    fn class_name(&self) -> &str {
        "Window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_host::HostEnvironment;

    fn membrane(host: &HostEnvironment, policy: MembranePolicy) -> Rc<Membrane> {
        let membrane = Membrane::new(
            SandboxId::new("unit").unwrap(),
            EndowmentSet::new().with("shared", Value::from("endowed")),
            host.global(),
            policy,
        );
        membrane.set_active(true);
        membrane
    }

    #[test]
    fn layers_answer_in_order() {
        let host = HostEnvironment::new();
        host.global().set("shared".into(), Value::from("host")).unwrap();
        let m = membrane(&host, MembranePolicy::default());

        assert_eq!(m.describe(&"shared".into()).unwrap().layer, Layer::Endowment);
        m.set("shared".into(), Value::from("local")).unwrap();
        assert_eq!(m.describe(&"shared".into()).unwrap().layer, Layer::Local);
        assert_eq!(m.describe(&"setTimeout".into()).unwrap().layer, Layer::Host);
        assert_eq!(m.describe(&"window".into()).unwrap().layer, Layer::SelfReference);
        assert!(m.describe(&"missing".into()).is_none());
    }

    #[test]
    fn inactive_writes_follow_policy() {
        let host = HostEnvironment::new();
        let m = membrane(&host, MembranePolicy::default());
        m.set_active(false);
        m.set("a".into(), Value::Number(1.0)).unwrap();
        assert!(m.get(&"a".into()).is_none());

        let rejecting = membrane(
            &host,
            MembranePolicy {
                inactive_writes: InactiveWrites::Reject,
                ..MembranePolicy::default()
            },
        );
        rejecting.set_active(false);
        let err = rejecting.set("a".into(), Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, ScriptError::Inactive(_)));
    }

    #[test]
    fn masked_keys_leave_enumeration() {
        let host = HostEnvironment::new();
        let m = membrane(&host, MembranePolicy::default());
        assert!(m.keys().contains(&"fetch".into()));
        assert!(m.delete(&"fetch".into()).unwrap());
        assert!(!m.keys().contains(&"fetch".into()));
        assert!(!m.has(&"fetch".into()));
        assert!(host.global().has(&"fetch".into()));
    }
}
