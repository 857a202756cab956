use realm_host::{
    ApiFamily, HostCall, HostEnvironment, HostError, HostReply, Interceptor, Next, NodeId,
};
use realm_types::{PatcherKind, SandboxId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

use super::{Ledger, PatchContext, Patcher, PatcherHandle, attributed_to};
use crate::error::{Result, SandboxError};

/// Redirects `<head>`/`<body>` appends into the sandbox container and
/// detaches everything the application put into the document.
pub struct DomInsertionPatcher;

#[derive(Default)]
struct DomLedger {
    inserted: RefCell<Vec<NodeId>>,
}

impl Ledger for DomLedger {
    fn effect_count(&self, host: &HostEnvironment) -> usize {
        self.inserted
            .borrow()
            .iter()
            .filter(|node| host.is_attached(**node))
            .count()
    }

    fn reverse(&self, host: &HostEnvironment) -> Vec<SandboxError> {
        let mut failures = Vec::new();
        for node in self.inserted.take().into_iter().rev() {
            let message = match host.detach(node) {
                Ok(true) => continue,
                Ok(false) => format!("{node} was already detached"),
                Err(err) => err.to_string(),
            };
            failures.push(SandboxError::Patcher {
                kind: PatcherKind::DomInsertion,
                message,
            });
        }
        failures
    }
}

struct DomInterceptor {
    sandbox_id: SandboxId,
    container: Option<NodeId>,
    ledger: Rc<DomLedger>,
}

impl DomInterceptor {
    fn redirect(&self, host: &HostEnvironment, parent: NodeId) -> NodeId {
        match self.container {
            Some(container) if parent == host.head() || parent == host.body() => {
                debug!(sandbox_id = %self.sandbox_id, from = %parent, to = %container, "insertion redirected");
                container
            }
            _ => parent,
        }
    }
}

impl Interceptor for DomInterceptor {
    fn family(&self) -> ApiFamily {
        ApiFamily::DomInsertion
    }

    fn intercept(
        &self,
        host: &HostEnvironment,
        call: HostCall,
        next: Next<'_>,
    ) -> std::result::Result<HostReply, HostError> {
        if !attributed_to(host, &self.sandbox_id) {
            return next(call);
        }
        let call = match call {
            HostCall::InsertChild { parent, child } => HostCall::InsertChild {
                parent: self.redirect(host, parent),
                child,
            },
            other => other,
        };
        let reply = next(call)?;
        if let HostReply::Inserted { child, .. } = &reply {
            // Appends inside a tree the app has not attached yet are not
            // document effects; attaching that tree is.
            let mut inserted = self.ledger.inserted.borrow_mut();
            if host.is_attached(*child) && !inserted.contains(child) {
                inserted.push(*child);
            }
        }
        Ok(reply)
    }
}

impl Patcher for DomInsertionPatcher {
    fn kind(&self) -> PatcherKind {
        PatcherKind::DomInsertion
    }

    fn install(&self, ctx: &PatchContext<'_>) -> Result<PatcherHandle> {
        if let Some(container) = ctx.container {
            if !ctx.host.is_attached(container) {
                return Err(SandboxError::Patcher {
                    kind: self.kind(),
                    message: format!("container {container} is not attached to the document"),
                });
            }
        }
        let ledger = Rc::new(DomLedger::default());
        let interceptor = ctx.host.add_interceptor(Rc::new(DomInterceptor {
            sandbox_id: ctx.sandbox_id.clone(),
            container: ctx.container,
            ledger: Rc::clone(&ledger),
        }));
        Ok(PatcherHandle::new(self.kind(), ctx.host, interceptor, ledger))
    }
}
