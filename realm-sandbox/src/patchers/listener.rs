use realm_host::{
    ApiFamily, HostCall, HostEnvironment, HostError, HostReply, Interceptor, ListenerId, Next,
};
use realm_types::{PatcherKind, SandboxId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

use super::{Ledger, PatchContext, Patcher, PatcherHandle, attributed_to};
use crate::error::{Result, SandboxError};

/// Tracks window event listeners and removes the survivors on uninstall.
pub struct ListenerPatcher;

#[derive(Default)]
struct ListenerLedger {
    registrations: RefCell<Vec<(ListenerId, String)>>,
}

impl Ledger for ListenerLedger {
    fn effect_count(&self, _host: &HostEnvironment) -> usize {
        self.registrations.borrow().len()
    }

    fn reverse(&self, host: &HostEnvironment) -> Vec<SandboxError> {
        self.registrations
            .take()
            .into_iter()
            .filter(|(id, _)| !host.remove_listener(*id))
            .map(|(id, event)| SandboxError::Patcher {
                kind: PatcherKind::Listener,
                message: format!("{id} for '{event}' was already removed"),
            })
            .collect()
    }
}

struct ListenerInterceptor {
    sandbox_id: SandboxId,
    ledger: Rc<ListenerLedger>,
}

impl Interceptor for ListenerInterceptor {
    fn family(&self) -> ApiFamily {
        ApiFamily::Listeners
    }

    fn intercept(
        &self,
        host: &HostEnvironment,
        call: HostCall,
        next: Next<'_>,
    ) -> std::result::Result<HostReply, HostError> {
        let ours = attributed_to(host, &self.sandbox_id);
        let event = match &call {
            HostCall::AddListener { event, .. } => Some(event.clone()),
            _ => None,
        };
        let reply = next(call)?;
        match (&reply, event) {
            (HostReply::Listener { id, added: true }, Some(event)) if ours => {
                trace!(sandbox_id = %self.sandbox_id, listener = %id, event = %event, "listener recorded");
                self.ledger.registrations.borrow_mut().push((*id, event));
            }
            (HostReply::ListenerRemoved(Some(id)), _) => {
                self.ledger.registrations.borrow_mut().retain(|(l, _)| l != id);
            }
            _ => {}
        }
        Ok(reply)
    }
}

impl Patcher for ListenerPatcher {
    fn kind(&self) -> PatcherKind {
        PatcherKind::Listener
    }

    fn install(&self, ctx: &PatchContext<'_>) -> Result<PatcherHandle> {
        let ledger = Rc::new(ListenerLedger::default());
        let interceptor = ctx.host.add_interceptor(Rc::new(ListenerInterceptor {
            sandbox_id: ctx.sandbox_id.clone(),
            ledger: Rc::clone(&ledger),
        }));
        Ok(PatcherHandle::new(self.kind(), ctx.host, interceptor, ledger))
    }
}
