//! The host environment handle.

use realm_script::{
    ObjectRef, PlainObject, Realm, ScriptError, Value, call_function, run,
};
use realm_types::SandboxId;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

use crate::dom::{Document, NodeId};
use crate::error::HostError;
use crate::events::{ListenerId, ListenerRegistry};
use crate::globals::{self, ElementObject, HostGlobal};
use crate::history::{EntryId, HistoryEntry, HistoryStack};
use crate::intercept::{HostCall, HostReply, Interceptor, InterceptorChain, InterceptorId};
use crate::timers::{TimerId, TimerQueue};

pub(crate) struct HostInner {
    global: Rc<HostGlobal>,
    realm: Rc<Realm>,
    timers: RefCell<TimerQueue>,
    listeners: RefCell<ListenerRegistry>,
    history: RefCell<HistoryStack>,
    document: RefCell<Document>,
    elements: RefCell<HashMap<NodeId, Rc<ElementObject>>>,
    running: RefCell<Vec<SandboxId>>,
    interceptors: RefCell<InterceptorChain>,
    sandbox_ids: RefCell<HashSet<SandboxId>>,
    console: RefCell<Vec<String>>,
}

/// Shared handle to the host page.
///
/// Cloning is cheap; all clones see the same page. Script-visible host
/// functions hold only a [`WeakHost`], so dropping the last handle frees
/// the page.
#[derive(Clone)]
pub struct HostEnvironment {
    inner: Rc<HostInner>,
}

/// Non-owning handle, for callbacks stored inside the host itself.
#[derive(Clone)]
pub struct WeakHost(Weak<HostInner>);

impl WeakHost {
    pub fn upgrade(&self) -> Option<HostEnvironment> {
        self.0.upgrade().map(|inner| HostEnvironment { inner })
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEnvironment {
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<HostInner>| {
            let global = globals::install(WeakHost(weak.clone()));
            let object: ObjectRef = global.clone();
            HostInner {
                global,
                realm: Realm::new(object),
                timers: RefCell::new(TimerQueue::default()),
                listeners: RefCell::new(ListenerRegistry::default()),
                history: RefCell::new(HistoryStack::default()),
                document: RefCell::new(Document::new()),
                elements: RefCell::new(HashMap::new()),
                running: RefCell::new(Vec::new()),
                interceptors: RefCell::new(InterceptorChain::default()),
                sandbox_ids: RefCell::new(HashSet::new()),
                console: RefCell::new(Vec::new()),
            }
        });
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakHost {
        WeakHost(Rc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same page.
    pub fn ptr_eq(&self, other: &HostEnvironment) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Global object ────────────────────────────────────────────

    /// The real global object of the page.
    pub fn global(&self) -> ObjectRef {
        self.inner.global.clone()
    }

    pub fn global_value(&self) -> Value {
        Value::Object(self.global())
    }

    /// The realm unsandboxed page code runs in.
    pub fn realm(&self) -> Rc<Realm> {
        Rc::clone(&self.inner.realm)
    }

    /// Runs page-level (unsandboxed) code against the host global.
    pub fn run_script(&self, source: &str, label: &str) -> Result<Value, ScriptError> {
        run(&self.inner.realm, source, label)
    }

    pub(crate) fn record_console(&self, line: String) {
        self.inner.console.borrow_mut().push(line);
    }

    /// Lines written through `console.log`, oldest first.
    pub fn console_lines(&self) -> Vec<String> {
        self.inner.console.borrow().clone()
    }

    // ── Attribution ──────────────────────────────────────────────

    /// Marks `id` as the sandbox whose code is running.
    pub fn enter_sandbox(&self, id: SandboxId) {
        trace!(sandbox_id = %id, "enter sandbox");
        self.inner.running.borrow_mut().push(id);
    }

    pub fn exit_sandbox(&self) {
        self.inner.running.borrow_mut().pop();
    }

    /// The sandbox whose code is currently running, if any.
    pub fn current_sandbox(&self) -> Option<SandboxId> {
        self.inner.running.borrow().last().cloned()
    }

    /// Claims a sandbox id. Returns `false` if it is already in use.
    pub fn claim_sandbox_id(&self, id: &SandboxId) -> bool {
        self.inner.sandbox_ids.borrow_mut().insert(id.clone())
    }

    pub fn release_sandbox_id(&self, id: &SandboxId) {
        self.inner.sandbox_ids.borrow_mut().remove(id);
    }

    // ── Interceptors ─────────────────────────────────────────────

    pub fn add_interceptor(&self, interceptor: Rc<dyn Interceptor>) -> InterceptorId {
        let family = interceptor.family();
        let id = self.inner.interceptors.borrow_mut().add(interceptor);
        debug!(interceptor = %id, family = ?family, "interceptor added");
        id
    }

    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        let removed = self.inner.interceptors.borrow_mut().remove(id);
        debug!(interceptor = %id, removed, "interceptor removed");
        removed
    }

    pub fn interceptor_count(&self) -> usize {
        self.inner.interceptors.borrow().len()
    }

    /// Sends `call` through the interceptor chain, then performs it.
    pub fn dispatch(&self, call: HostCall) -> Result<HostReply, HostError> {
        let chain = self.inner.interceptors.borrow().for_family(call.family());
        trace!(call = call.name(), interceptors = chain.len(), "host call");
        self.run_chain(&chain, call)
    }

    fn run_chain(
        &self,
        chain: &[Rc<dyn Interceptor>],
        call: HostCall,
    ) -> Result<HostReply, HostError> {
        match chain.split_first() {
            Some((outer, rest)) => outer.intercept(self, call, &|call| self.run_chain(rest, call)),
            None => self.perform(call),
        }
    }

    fn perform(&self, call: HostCall) -> Result<HostReply, HostError> {
        Ok(match call {
            HostCall::SetTimer {
                callback,
                delay_ms,
                repeat,
                args,
            } => HostReply::Timer(
                self.inner
                    .timers
                    .borrow_mut()
                    .schedule(callback, args, delay_ms, repeat),
            ),
            HostCall::ClearTimer(id) => HostReply::TimerCleared {
                id,
                cleared: self.clear_timer(id),
            },
            HostCall::AddListener { event, callback } => {
                let (id, added) = self.inner.listeners.borrow_mut().add(&event, callback);
                HostReply::Listener { id, added }
            }
            HostCall::RemoveListener { event, callback } => {
                HostReply::ListenerRemoved(self.inner.listeners.borrow_mut().remove(&event, &callback))
            }
            HostCall::PushState { state, url } => {
                HostReply::Pushed(self.inner.history.borrow_mut().push(state, url))
            }
            HostCall::ReplaceState { state, url } => {
                let previous = self
                    .inner
                    .history
                    .borrow_mut()
                    .replace(state, url)
                    .ok_or_else(|| HostError::Refused("history is empty".into()))?;
                HostReply::Replaced {
                    id: previous.id,
                    previous,
                }
            }
            HostCall::InsertChild { parent, child } => {
                self.inner.document.borrow_mut().append_child(parent, child)?;
                HostReply::Inserted { parent, child }
            }
        })
    }

    // ── Timers ───────────────────────────────────────────────────

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.timers.borrow().now()
    }

    /// Moves the clock forward by `ms`, firing every timer that falls due.
    /// Returns the number of callbacks run. Callback errors are logged.
    pub fn advance(&self, ms: u64) -> usize {
        let until = self.now().saturating_add(ms);
        let mut fired = 0;
        loop {
            let due = self.inner.timers.borrow_mut().pop_due(until);
            let Some((id, callback, args)) = due else {
                break;
            };
            fired += 1;
            debug!(timer = %id, at = self.now(), "timer fired");
            if let Err(err) = call_function(&callback, Value::Undefined, args) {
                warn!(timer = %id, error = %err, "timer callback failed");
            }
        }
        self.inner.timers.borrow_mut().set_now(until);
        fired
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    pub fn has_timer(&self, id: TimerId) -> bool {
        self.inner.timers.borrow().contains(id)
    }

    /// Cancels a timer without consulting interceptors.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.inner.timers.borrow_mut().clear(id)
    }

    // ── Events ───────────────────────────────────────────────────

    /// Fires `event` on the window. Returns the number of listeners called.
    pub fn dispatch_event(&self, event: &str) -> usize {
        self.dispatch_event_with(event, PlainObject::new())
    }

    fn dispatch_event_with(&self, event: &str, payload: PlainObject) -> usize {
        payload.insert("type", Value::from(event));
        let payload = Value::object(payload);
        let callbacks = self.inner.listeners.borrow().callbacks_for(event);
        for callback in &callbacks {
            if let Err(err) = call_function(callback, Value::Undefined, vec![payload.clone()]) {
                warn!(event, error = %err, "event listener failed");
            }
        }
        callbacks.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.borrow().count(event)
    }

    pub fn total_listeners(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Removes a registration without consulting interceptors.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.borrow_mut().remove_id(id)
    }

    // ── History ──────────────────────────────────────────────────

    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.inner.history.borrow().entries().to_vec()
    }

    pub fn current_entry(&self) -> Option<HistoryEntry> {
        self.inner.history.borrow().current().cloned()
    }

    /// Goes back one entry and fires `popstate`. Returns `false` at the start of history.
    pub fn history_back(&self) -> bool {
        let state = self.inner.history.borrow_mut().back().map(|e| e.state.clone());
        match state {
            Some(state) => {
                self.dispatch_event_with("popstate", PlainObject::new().with("state", state));
                true
            }
            None => false,
        }
    }

    pub fn remove_history_entry(&self, id: EntryId) -> bool {
        self.inner.history.borrow_mut().remove(id)
    }

    pub fn restore_history_entry(&self, id: EntryId, state: Value, url: String) -> bool {
        self.inner.history.borrow_mut().restore(id, state, url)
    }

    // ── Document ─────────────────────────────────────────────────

    pub fn document(&self) -> Ref<'_, Document> {
        self.inner.document.borrow()
    }

    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.inner.document.borrow_mut()
    }

    pub fn head(&self) -> NodeId {
        self.document().head()
    }

    pub fn body(&self) -> NodeId {
        self.document().body()
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.document_mut().create_element(tag)
    }

    /// Appends without consulting interceptors.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.document_mut().append_child(parent, child)
    }

    pub fn detach(&self, node: NodeId) -> Result<bool, HostError> {
        self.document_mut().detach(node)
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.document().is_attached(node)
    }

    /// The script object for `node`. The same node always yields the same object.
    pub fn element_value(&self, node: NodeId) -> Value {
        let element = self
            .inner
            .elements
            .borrow_mut()
            .entry(node)
            .or_insert_with(|| Rc::new(ElementObject::new(self.downgrade(), node)))
            .clone();
        let object: ObjectRef = element;
        Value::Object(object)
    }

    /// The node behind an element object created by this host.
    pub fn node_of(&self, value: &Value) -> Option<NodeId> {
        let element = value.as_object()?.as_any()?.downcast_ref::<ElementObject>()?;
        element
            .belongs_to(self)
            .then_some(element.node())
    }
}

/// Helper for host functions: upgrades the handle or fails as a script error.
pub(crate) fn with_host<T>(
    host: &WeakHost,
    f: impl FnOnce(&HostEnvironment) -> Result<T, ScriptError>,
) -> Result<T, ScriptError> {
    let env = host.upgrade().ok_or(HostError::Gone)?;
    f(&env)
}

impl WeakHost {
    pub(crate) fn points_to(&self, host: &HostEnvironment) -> bool {
        Weak::as_ptr(&self.0) == Rc::as_ptr(&host.inner)
    }
}
