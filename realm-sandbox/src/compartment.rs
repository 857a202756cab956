//! Runs application code against a membrane.

use realm_host::WeakHost;
use realm_script::{FunctionRef, Realm, RealmHooks, ScriptError, Value, call_function, run};
use realm_types::SandboxId;
use std::rc::Rc;
use tracing::debug;

use crate::membrane::Membrane;

/// One unit of application source (a script tag body, an inline module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    pub label: String,
    pub source: String,
}

impl CodeUnit {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }
}

/// Marks the host as running a sandbox for as long as its code is on the stack.
struct AttributionHooks {
    host: WeakHost,
    id: SandboxId,
}

impl RealmHooks for AttributionHooks {
    fn enter(&self) {
        if let Some(host) = self.host.upgrade() {
            host.enter_sandbox(self.id.clone());
        }
    }

    fn exit(&self) {
        if let Some(host) = self.host.upgrade() {
            host.exit_sandbox();
        }
    }
}

/// An execution context whose global object is a [`Membrane`].
///
/// Every unit evaluated here shares the same realm, so state written by
/// one unit is visible to the next.
pub struct Compartment {
    realm: Rc<Realm>,
}

impl Compartment {
    pub fn new(membrane: &Rc<Membrane>, host: WeakHost) -> Self {
        let hooks = Rc::new(AttributionHooks {
            host,
            id: membrane.id().clone(),
        });
        Self {
            realm: Realm::with_hooks(membrane.object(), hooks),
        }
    }

    pub fn realm(&self) -> &Rc<Realm> {
        &self.realm
    }

    /// Evaluates `unit`; script errors come back unchanged.
    pub fn evaluate(&self, unit: &CodeUnit) -> Result<Value, ScriptError> {
        debug!(label = %unit.label, bytes = unit.source.len(), "evaluating code unit");
        run(&self.realm, &unit.source, &unit.label)
    }

    /// Calls a function created inside this compartment.
    pub fn call(&self, func: &FunctionRef, args: Vec<Value>) -> Result<Value, ScriptError> {
        call_function(func, Value::Undefined, args)
    }
}
