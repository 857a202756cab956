//! The sandbox controller.
//!
//! A [`Sandbox`] owns one application's membrane, compartment and effect
//! patchers and moves them through `Created -> Mounted -> Unmounted`.
//! Patchers are installed exactly while the sandbox is mounted.

use realm_host::{HostEnvironment, NodeId};
use realm_script::{FunctionRef, ScriptError, ScriptObject, Value};
use realm_types::{LifecyclePhase, PatcherKind, PropertyKey, SandboxId, SandboxState};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::compartment::{CodeUnit, Compartment};
use crate::config::{RecoveryMode, SandboxOptions};
use crate::endowments::EndowmentSet;
use crate::error::{AppFailure, Result, SandboxError};
use crate::membrane::{Membrane, MembranePolicy};
use crate::patchers::{self, PatchContext, PatcherHandle};

pub struct Sandbox {
    id: SandboxId,
    host: HostEnvironment,
    options: SandboxOptions,
    membrane: Rc<Membrane>,
    compartment: Compartment,
    container: Option<NodeId>,
    state: SandboxState,
    /// Enabled patchers in install order.
    patchers: Vec<PatcherKind>,
    /// Installed handles, in install order.
    handles: Vec<PatcherHandle>,
}

impl Sandbox {
    /// Creates a sandbox on `host`.
    ///
    /// Fails with a configuration error if `id` is already claimed by a live
    /// sandbox or the options are inconsistent.
    pub fn create(
        host: &HostEnvironment,
        id: SandboxId,
        endowments: EndowmentSet,
        options: SandboxOptions,
    ) -> Result<Self> {
        options.validate()?;
        if !host.claim_sandbox_id(&id) {
            return Err(SandboxError::Configuration(format!(
                "sandbox id '{id}' is already in use"
            )));
        }

        let membrane = Membrane::new(
            id.clone(),
            endowments,
            host.global(),
            MembranePolicy::from(&options),
        );
        let compartment = Compartment::new(&membrane, host.downgrade());
        let patchers = options.patchers_in_install_order();

        info!(sandbox_id = %id, patchers = patchers.len(), strict = options.strict, "Sandbox created");
        Ok(Self {
            id,
            host: host.clone(),
            options,
            membrane,
            compartment,
            container: None,
            state: SandboxState::Created,
            patchers,
            handles: Vec::new(),
        })
    }

    /// Sets the element DOM insertions are redirected into. Applies from the next mount.
    pub fn with_container(mut self, container: NodeId) -> Self {
        self.container = Some(container);
        self
    }

    // ================================================================
    // Lifecycle
    // ================================================================

    /// Installs patchers and opens the membrane for writes. No-op if already mounted.
    pub fn mount(&mut self) {
        if self.state.is_mounted() {
            debug!(sandbox_id = %self.id, "mount ignored, already mounted");
            return;
        }

        let ctx = PatchContext {
            host: &self.host,
            sandbox_id: &self.id,
            container: self.container,
        };
        for kind in &self.patchers {
            match patchers::for_kind(*kind).install(&ctx) {
                Ok(handle) => self.handles.push(handle),
                Err(e) => warn!(sandbox_id = %self.id, kind = %kind, "patcher install failed: {}", e),
            }
        }

        self.membrane.set_active(true);
        self.state = SandboxState::Mounted;
        info!(sandbox_id = %self.id, patchers = self.handles.len(), "Sandbox mounted");
    }

    /// Uninstalls patchers in reverse order, reversing their effects.
    ///
    /// Always completes; patcher failures are logged. No-op unless mounted.
    pub fn unmount(&mut self) {
        if !self.state.is_mounted() {
            debug!(sandbox_id = %self.id, state = %self.state, "unmount ignored");
            return;
        }

        while let Some(handle) = self.handles.pop() {
            let kind = handle.kind();
            for failure in handle.uninstall() {
                warn!(sandbox_id = %self.id, kind = %kind, "patcher uninstall: {}", failure);
            }
        }

        self.membrane.set_active(false);
        self.membrane.clear_caches();
        if self.options.recovery == RecoveryMode::Fresh {
            self.membrane.clear_record();
        }
        self.state = SandboxState::Unmounted;
        info!(sandbox_id = %self.id, "Sandbox unmounted");
    }

    /// Releases the sandbox for good.
    ///
    /// A mounted sandbox is handed back untouched; unmount it first.
    pub fn destroy(self) -> std::result::Result<(), Box<Sandbox>> {
        if self.state.is_mounted() {
            warn!(sandbox_id = %self.id, "destroy refused while mounted");
            return Err(Box::new(self));
        }
        self.membrane.clear_record();
        info!(sandbox_id = %self.id, "Sandbox destroyed");
        Ok(())
    }

    // ================================================================
    // Execution
    // ================================================================

    /// Runs a code unit inside the sandbox. Only valid while mounted.
    pub fn run(&self, unit: &CodeUnit) -> Result<Value> {
        if !self.state.is_mounted() {
            return Err(self.state_error("run code"));
        }
        self.evaluate(unit, LifecyclePhase::Run)
    }

    pub(crate) fn evaluate(&self, unit: &CodeUnit, phase: LifecyclePhase) -> Result<Value> {
        self.compartment
            .evaluate(unit)
            .map_err(|e| self.script_failure(phase, &unit.label, e))
    }

    /// Calls a script function from this sandbox with no receiver.
    pub fn call(&self, func: &FunctionRef, args: Vec<Value>) -> std::result::Result<Value, ScriptError> {
        self.compartment.call(func, args)
    }

    /// Wraps an application failure with this sandbox's id and the phase it happened in.
    pub fn application_error(
        &self,
        phase: LifecyclePhase,
        label: &str,
        failure: AppFailure,
    ) -> SandboxError {
        match failure {
            AppFailure::Script(err) => self.script_failure(phase, label, err),
            hook => SandboxError::ApplicationExecution {
                sandbox_id: self.id.clone(),
                phase,
                label: label.to_string(),
                source: hook,
            },
        }
    }

    fn script_failure(&self, phase: LifecyclePhase, label: &str, err: ScriptError) -> SandboxError {
        match err {
            ScriptError::ReadOnlyProperty(key) => SandboxError::ReadOnlyProperty {
                sandbox_id: self.id.clone(),
                key,
            },
            err => SandboxError::ApplicationExecution {
                sandbox_id: self.id.clone(),
                phase,
                label: label.to_string(),
                source: AppFailure::Script(err),
            },
        }
    }

    fn state_error(&self, operation: &'static str) -> SandboxError {
        SandboxError::State {
            sandbox_id: self.id.clone(),
            operation,
            state: self.state,
        }
    }

    // ================================================================
    // Globals
    // ================================================================

    /// Reads a global as the application sees it.
    pub fn get_global(&self, key: impl Into<PropertyKey>) -> Option<Value> {
        self.membrane.get(&key.into())
    }

    /// Writes a global into the sandbox, as if the application had.
    pub fn set_global(&self, key: impl Into<PropertyKey>, value: Value) -> Result<()> {
        self.membrane
            .set(key.into(), value)
            .map_err(|e| self.access_error(e))
    }

    pub fn delete_global(&self, key: impl Into<PropertyKey>) -> Result<bool> {
        self.membrane
            .delete(&key.into())
            .map_err(|e| self.access_error(e))
    }

    fn access_error(&self, err: ScriptError) -> SandboxError {
        match err {
            ScriptError::Inactive(_) => self.state_error("write globals"),
            err => self.script_failure(LifecyclePhase::Run, "host", err),
        }
    }

    // ================================================================
    // Accessors
    // ================================================================

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// The container element, if one is configured.
    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    pub fn membrane(&self) -> &Rc<Membrane> {
        &self.membrane
    }

    pub fn compartment(&self) -> &Compartment {
        &self.compartment
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Kinds of the patchers currently installed, in install order.
    pub fn active_patchers(&self) -> Vec<PatcherKind> {
        self.handles.iter().map(PatcherHandle::kind).collect()
    }

    /// Effects currently recorded across all installed patchers.
    pub fn effect_count(&self) -> usize {
        self.handles.iter().map(PatcherHandle::effect_count).sum()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.state.is_mounted() {
            warn!(sandbox_id = %self.id, "sandbox dropped while mounted, unmounting");
            self.unmount();
        }
        // Closures in the record hold the realm, which holds the membrane.
        self.membrane.clear_record();
        self.membrane.clear_caches();
        self.host.release_sandbox_id(&self.id);
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("container", &self.container)
            .field("patchers", &self.active_patchers())
            .finish()
    }
}
