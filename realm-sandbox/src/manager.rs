//! Registry of every sandbox on one host page.

use realm_host::{HostEnvironment, NodeId};
use realm_script::Value;
use realm_types::SandboxId;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::compartment::CodeUnit;
use crate::config::{SandboxConfig, SandboxOptions};
use crate::endowments::EndowmentSet;
use crate::error::{Result, SandboxError};
use crate::sandbox::Sandbox;

/// Owns the sandboxes of one host and enforces singular mode.
pub struct SandboxManager {
    host: HostEnvironment,
    sandboxes: HashMap<SandboxId, Sandbox>,
    defaults: SandboxOptions,
}

impl SandboxManager {
    pub fn new(host: &HostEnvironment, config: SandboxConfig) -> Self {
        Self {
            host: host.clone(),
            sandboxes: HashMap::new(),
            defaults: config.into_options(),
        }
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    pub fn defaults(&self) -> &SandboxOptions {
        &self.defaults
    }

    // ================================================================
    // Creation / destruction
    // ================================================================

    /// Creates a sandbox with the manager's default options.
    pub fn create(&mut self, id: SandboxId, endowments: EndowmentSet) -> Result<()> {
        self.create_with(id, endowments, self.defaults.clone(), None)
    }

    pub fn create_with(
        &mut self,
        id: SandboxId,
        endowments: EndowmentSet,
        options: SandboxOptions,
        container: Option<NodeId>,
    ) -> Result<()> {
        let mut sandbox = Sandbox::create(&self.host, id.clone(), endowments, options)?;
        if let Some(container) = container {
            sandbox = sandbox.with_container(container);
        }
        self.sandboxes.insert(id, sandbox);
        Ok(())
    }

    /// Destroys an unmounted sandbox.
    pub fn destroy(&mut self, id: &SandboxId) -> Result<()> {
        let sandbox = self.get(id)?;
        if sandbox.state().is_mounted() {
            return Err(SandboxError::State {
                sandbox_id: id.clone(),
                operation: "destroy",
                state: sandbox.state(),
            });
        }
        if let Some(sandbox) = self.sandboxes.remove(id) {
            if let Err(sandbox) = sandbox.destroy() {
                self.sandboxes.insert(id.clone(), *sandbox);
            }
        }
        Ok(())
    }

    // ================================================================
    // Lifecycle
    // ================================================================

    /// Mounts `id`. If it or any mounted sandbox is singular, every other
    /// mounted sandbox is unmounted first.
    pub fn mount(&mut self, id: &SandboxId) -> Result<()> {
        let singular = self.get(id)?.options().singular;
        let others: Vec<SandboxId> = self
            .sandboxes
            .iter()
            .filter(|(other, sandbox)| {
                *other != id
                    && sandbox.state().is_mounted()
                    && (singular || sandbox.options().singular)
            })
            .map(|(other, _)| other.clone())
            .collect();
        for other in others {
            info!(sandbox_id = %other, mounting = %id, "singular mode, unmounting");
            self.get_mut(&other)?.unmount();
        }
        self.get_mut(id)?.mount();
        Ok(())
    }

    pub fn unmount(&mut self, id: &SandboxId) -> Result<()> {
        self.get_mut(id)?.unmount();
        Ok(())
    }

    pub fn unmount_all(&mut self) {
        for sandbox in self.sandboxes.values_mut() {
            sandbox.unmount();
        }
    }

    pub fn run(&self, id: &SandboxId, unit: &CodeUnit) -> Result<Value> {
        let sandbox = self.get(id)?;
        sandbox.run(unit).inspect_err(|e| {
            warn!(sandbox_id = %id, label = %unit.label, "run failed: {}", e);
        })
    }

    // ================================================================
    // Access
    // ================================================================

    pub fn get(&self, id: &SandboxId) -> Result<&Sandbox> {
        self.sandboxes
            .get(id)
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    pub fn get_mut(&mut self, id: &SandboxId) -> Result<&mut Sandbox> {
        self.sandboxes
            .get_mut(id)
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    /// Ids of every sandbox, sorted.
    pub fn list(&self) -> Vec<&SandboxId> {
        let mut ids: Vec<_> = self.sandboxes.keys().collect();
        ids.sort();
        ids
    }

    /// Ids of mounted sandboxes, sorted.
    pub fn mounted(&self) -> Vec<&SandboxId> {
        let mut ids: Vec<_> = self
            .sandboxes
            .iter()
            .filter(|(_, sandbox)| sandbox.state().is_mounted())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }
}
