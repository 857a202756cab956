//! The interceptor chain side-effecting host calls pass through.
//!
//! Every call that creates or removes a global side effect is reified as a
//! [`HostCall`] and dispatched through the interceptors registered for its
//! [`ApiFamily`] before the host performs it. The most recently registered
//! interceptor runs outermost. Interceptors are removed one at a time by
//! [`InterceptorId`], so any number of owners can layer over the same API
//! and leave in any order.

use realm_script::{FunctionRef, Value};
use std::fmt;
use std::rc::Rc;

use crate::HostEnvironment;
use crate::dom::NodeId;
use crate::error::HostError;
use crate::events::ListenerId;
use crate::history::{EntryId, HistoryEntry};
use crate::timers::TimerId;

/// A group of host APIs that one interceptor wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    Timers,
    Listeners,
    History,
    DomInsertion,
}

/// A side-effecting host call, before it is performed.
#[derive(Clone)]
pub enum HostCall {
    SetTimer {
        callback: FunctionRef,
        delay_ms: u64,
        repeat: bool,
        args: Vec<Value>,
    },
    ClearTimer(TimerId),
    AddListener {
        event: String,
        callback: FunctionRef,
    },
    RemoveListener {
        event: String,
        callback: FunctionRef,
    },
    PushState {
        state: Value,
        url: Option<String>,
    },
    ReplaceState {
        state: Value,
        url: Option<String>,
    },
    InsertChild {
        parent: NodeId,
        child: NodeId,
    },
}

impl HostCall {
    pub fn family(&self) -> ApiFamily {
        match self {
            Self::SetTimer { .. } | Self::ClearTimer(_) => ApiFamily::Timers,
            Self::AddListener { .. } | Self::RemoveListener { .. } => ApiFamily::Listeners,
            Self::PushState { .. } | Self::ReplaceState { .. } => ApiFamily::History,
            Self::InsertChild { .. } => ApiFamily::DomInsertion,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTimer { repeat: false, .. } => "setTimeout",
            Self::SetTimer { repeat: true, .. } => "setInterval",
            Self::ClearTimer(_) => "clearTimer",
            Self::AddListener { .. } => "addEventListener",
            Self::RemoveListener { .. } => "removeEventListener",
            Self::PushState { .. } => "pushState",
            Self::ReplaceState { .. } => "replaceState",
            Self::InsertChild { .. } => "appendChild",
        }
    }
}

impl fmt::Debug for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTimer { delay_ms, repeat, .. } => f
                .debug_struct("SetTimer")
                .field("delay_ms", delay_ms)
                .field("repeat", repeat)
                .finish_non_exhaustive(),
            Self::ClearTimer(id) => f.debug_tuple("ClearTimer").field(id).finish(),
            Self::AddListener { event, .. } => {
                f.debug_struct("AddListener").field("event", event).finish_non_exhaustive()
            }
            Self::RemoveListener { event, .. } => {
                f.debug_struct("RemoveListener").field("event", event).finish_non_exhaustive()
            }
            Self::PushState { url, .. } => f.debug_struct("PushState").field("url", url).finish(),
            Self::ReplaceState { url, .. } => {
                f.debug_struct("ReplaceState").field("url", url).finish()
            }
            Self::InsertChild { parent, child } => f
                .debug_struct("InsertChild")
                .field("parent", parent)
                .field("child", child)
                .finish(),
        }
    }
}

/// What the host did in response to a [`HostCall`].
#[derive(Debug, Clone)]
pub enum HostReply {
    Timer(TimerId),
    /// `cleared` is false when the id named no pending timer.
    TimerCleared {
        id: TimerId,
        cleared: bool,
    },
    /// `added` is false when the same callback was already registered.
    Listener {
        id: ListenerId,
        added: bool,
    },
    ListenerRemoved(Option<ListenerId>),
    Pushed(EntryId),
    Replaced {
        id: EntryId,
        previous: HistoryEntry,
    },
    Inserted {
        parent: NodeId,
        child: NodeId,
    },
}

/// Continuation passed to an interceptor: the rest of the chain plus the
/// host operation itself.
pub type Next<'a> = &'a dyn Fn(HostCall) -> Result<HostReply, HostError>;

/// A wrapper around one family of host APIs.
pub trait Interceptor {
    fn family(&self) -> ApiFamily;

    /// Handles `call`, normally by delegating to `next` and observing the reply.
    fn intercept(
        &self,
        host: &HostEnvironment,
        call: HostCall,
        next: Next<'_>,
    ) -> Result<HostReply, HostError>;
}

/// Registration handle for an installed interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interceptor-{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct InterceptorChain {
    next_id: u64,
    entries: Vec<(InterceptorId, Rc<dyn Interceptor>)>,
}

impl InterceptorChain {
    pub(crate) fn add(&mut self, interceptor: Rc<dyn Interceptor>) -> InterceptorId {
        self.next_id += 1;
        let id = InterceptorId(self.next_id);
        self.entries.push((id, interceptor));
        id
    }

    pub(crate) fn remove(&mut self, id: InterceptorId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Interceptors for `family`, outermost first.
    pub(crate) fn for_family(&self, family: ApiFamily) -> Vec<Rc<dyn Interceptor>> {
        self.entries
            .iter()
            .rev()
            .filter(|(_, i)| i.family() == family)
            .map(|(_, i)| Rc::clone(i))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
