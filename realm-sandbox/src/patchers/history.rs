use realm_host::{
    ApiFamily, EntryId, HostCall, HostEnvironment, HostError, HostReply, Interceptor, Next,
};
use realm_script::Value;
use realm_types::{PatcherKind, SandboxId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

use super::{Ledger, PatchContext, Patcher, PatcherHandle, attributed_to};
use crate::error::{Result, SandboxError};

/// Removes pushed history entries and restores replaced ones on uninstall.
pub struct HistoryPatcher;

struct Replaced {
    id: EntryId,
    state: Value,
    url: String,
}

#[derive(Default)]
struct HistoryLedger {
    pushed: RefCell<Vec<EntryId>>,
    /// Entries the app replaced but did not push, with their original contents.
    replaced: RefCell<Vec<Replaced>>,
}

impl Ledger for HistoryLedger {
    fn effect_count(&self, _host: &HostEnvironment) -> usize {
        self.pushed.borrow().len() + self.replaced.borrow().len()
    }

    fn reverse(&self, host: &HostEnvironment) -> Vec<SandboxError> {
        let mut failures = Vec::new();
        for entry in self.replaced.take() {
            if !host.restore_history_entry(entry.id, entry.state, entry.url) {
                failures.push(SandboxError::Patcher {
                    kind: PatcherKind::History,
                    message: format!("replaced entry {} no longer exists", entry.id),
                });
            }
        }
        for id in self.pushed.take().into_iter().rev() {
            // Navigating back already dropped it.
            if !host.remove_history_entry(id) {
                debug!(entry = %id, "pushed entry already gone");
            }
        }
        failures
    }
}

struct HistoryInterceptor {
    sandbox_id: SandboxId,
    ledger: Rc<HistoryLedger>,
}

impl Interceptor for HistoryInterceptor {
    fn family(&self) -> ApiFamily {
        ApiFamily::History
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
        let reply = next(call)?;
        match &reply {
            HostReply::Pushed(id) => {
                trace!(sandbox_id = %self.sandbox_id, entry = %id, "history push recorded");
                self.ledger.pushed.borrow_mut().push(*id);
            }
            HostReply::Replaced { id, previous } => {
                let ours = self.ledger.pushed.borrow().contains(id);
                let mut replaced = self.ledger.replaced.borrow_mut();
                if !ours && !replaced.iter().any(|r| r.id == *id) {
                    trace!(sandbox_id = %self.sandbox_id, entry = %id, "history replace recorded");
                    replaced.push(Replaced {
                        id: *id,
                        state: previous.state.clone(),
                        url: previous.url.clone(),
                    });
                }
            }
            _ => {}
        }
        Ok(reply)
    }
}

impl Patcher for HistoryPatcher {
    fn kind(&self) -> PatcherKind {
        PatcherKind::History
    }

    fn install(&self, ctx: &PatchContext<'_>) -> Result<PatcherHandle> {
        let ledger = Rc::new(HistoryLedger::default());
        let interceptor = ctx.host.add_interceptor(Rc::new(HistoryInterceptor {
            sandbox_id: ctx.sandbox_id.clone(),
            ledger: Rc::clone(&ledger),
        }));
        Ok(PatcherHandle::new(self.kind(), ctx.host, interceptor, ledger))
    }
}
