//! Effect patchers.
//!
//! Each patcher owns one class of global side effect. Installing it
//! registers an interceptor on the host that records, in a per-sandbox
//! ledger, every effect made while that sandbox's code is running.
//! Uninstalling removes the interceptor and reverses the ledger.
//!
//! Interceptors from different sandboxes stack on the same host API and are
//! removed individually, so patchers compose.

mod dom;
mod history;
mod listener;
mod timer;

use realm_host::{HostEnvironment, InterceptorId, NodeId};
use realm_types::{PatcherKind, SandboxId};
use std::rc::Rc;
use tracing::debug;

use crate::error::{Result, SandboxError};

pub use dom::DomInsertionPatcher;
pub use history::HistoryPatcher;
pub use listener::ListenerPatcher;
pub use timer::TimerPatcher;

/// What a patcher needs to know about the sandbox it serves.
pub struct PatchContext<'a> {
    pub host: &'a HostEnvironment,
    pub sandbox_id: &'a SandboxId,
    /// Element that DOM insertions are redirected into.
    pub container: Option<NodeId>,
}

pub trait Patcher {
    fn kind(&self) -> PatcherKind;

    /// Starts intercepting this patcher's host API for `ctx.sandbox_id`.
    fn install(&self, ctx: &PatchContext<'_>) -> Result<PatcherHandle>;
}

/// Returns the patcher implementing `kind`.
pub fn for_kind(kind: PatcherKind) -> Box<dyn Patcher> {
    match kind {
        PatcherKind::Timer => Box::new(TimerPatcher),
        PatcherKind::Listener => Box::new(ListenerPatcher),
        PatcherKind::DomInsertion => Box::new(DomInsertionPatcher),
        PatcherKind::History => Box::new(HistoryPatcher),
    }
}

/// Side effects recorded by one installed patcher.
pub(crate) trait Ledger {
    /// Effects that would be reversed right now.
    fn effect_count(&self, host: &HostEnvironment) -> usize;

    /// Undoes every recorded effect. Failures are collected, never raised.
    fn reverse(&self, host: &HostEnvironment) -> Vec<SandboxError>;
}

/// An installed patcher.
pub struct PatcherHandle {
    kind: PatcherKind,
    host: HostEnvironment,
    interceptor: InterceptorId,
    ledger: Rc<dyn Ledger>,
}

impl PatcherHandle {
    pub(crate) fn new(
        kind: PatcherKind,
        host: &HostEnvironment,
        interceptor: InterceptorId,
        ledger: Rc<dyn Ledger>,
    ) -> Self {
        Self {
            kind,
            host: host.clone(),
            interceptor,
            ledger,
        }
    }

    pub fn kind(&self) -> PatcherKind {
        self.kind
    }

    pub fn effect_count(&self) -> usize {
        self.ledger.effect_count(&self.host)
    }

    /// Stops intercepting and reverses every recorded effect.
    ///
    /// Returns the failures met along the way; the uninstall itself always
    /// completes.
    pub fn uninstall(self) -> Vec<SandboxError> {
        let mut failures = Vec::new();
        if !self.host.remove_interceptor(self.interceptor) {
            failures.push(SandboxError::Patcher {
                kind: self.kind,
                message: format!("{} was already removed", self.interceptor),
            });
        }
        let pending = self.ledger.effect_count(&self.host);
        failures.extend(self.ledger.reverse(&self.host));
        debug!(kind = %self.kind, reversed = pending, failures = failures.len(), "patcher uninstalled");
        failures
    }
}

/// Whether the code running on `host` belongs to `id`.
fn attributed_to(host: &HostEnvironment, id: &SandboxId) -> bool {
    host.current_sandbox().as_ref() == Some(id)
}
