use realm_host::{
    ApiFamily, HostCall, HostEnvironment, HostError, HostReply, Interceptor, Next, TimerId,
};
use realm_types::{PatcherKind, SandboxId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

use super::{Ledger, PatchContext, Patcher, PatcherHandle, attributed_to};
use crate::error::{Result, SandboxError};

/// Tracks `setTimeout` / `setInterval` and clears what is left on uninstall.
pub struct TimerPatcher;

#[derive(Default)]
struct TimerLedger {
    ids: RefCell<Vec<TimerId>>,
}

impl Ledger for TimerLedger {
    fn effect_count(&self, host: &HostEnvironment) -> usize {
        self.ids.borrow().iter().filter(|id| host.has_timer(**id)).count()
    }

    fn reverse(&self, host: &HostEnvironment) -> Vec<SandboxError> {
        for id in self.ids.take() {
            // Timeouts that already fired are gone from the queue.
            if host.clear_timer(id) {
                debug!(timer = %id, "pending timer cleared");
            }
        }
        Vec::new()
    }
}

struct TimerInterceptor {
    sandbox_id: SandboxId,
    ledger: Rc<TimerLedger>,
}

impl Interceptor for TimerInterceptor {
    fn family(&self) -> ApiFamily {
        ApiFamily::Timers
    }

    fn intercept(
        &self,
        host: &HostEnvironment,
        call: HostCall,
        next: Next<'_>,
    ) -> std::result::Result<HostReply, HostError> {
        let ours = attributed_to(host, &self.sandbox_id);
        let reply = next(call)?;
        match &reply {
            HostReply::Timer(id) if ours => {
                trace!(sandbox_id = %self.sandbox_id, timer = %id, "timer recorded");
                self.ledger.ids.borrow_mut().push(*id);
            }
            HostReply::TimerCleared { id, .. } => {
                self.ledger.ids.borrow_mut().retain(|t| t != id);
            }
            _ => {}
        }
        Ok(reply)
    }
}

impl Patcher for TimerPatcher {
    fn kind(&self) -> PatcherKind {
        PatcherKind::Timer
    }

    fn install(&self, ctx: &PatchContext<'_>) -> Result<PatcherHandle> {
        let ledger = Rc::new(TimerLedger::default());
        let interceptor = ctx.host.add_interceptor(Rc::new(TimerInterceptor {
            sandbox_id: ctx.sandbox_id.clone(),
            ledger: Rc::clone(&ledger),
        }));
        Ok(PatcherHandle::new(self.kind(), ctx.host, interceptor, ledger))
    }
}
