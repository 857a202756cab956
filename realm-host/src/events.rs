//! Window-level event listener registrations.

use realm_script::FunctionRef;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Listener {
    id: ListenerId,
    event: String,
    callback: FunctionRef,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<Listener>,
}

impl ListenerRegistry {
    /// Registers `callback` for `event`. Registering the same callback for the
    /// same event twice is a no-op that returns the existing id.
    pub(crate) fn add(&mut self, event: &str, callback: FunctionRef) -> (ListenerId, bool) {
        if let Some(existing) = self.find(event, &callback) {
            return (existing, false);
        }
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push(Listener {
            id,
            event: event.to_string(),
            callback,
        });
        (id, true)
    }

    pub(crate) fn remove(&mut self, event: &str, callback: &FunctionRef) -> Option<ListenerId> {
        let id = self.find(event, callback)?;
        self.remove_id(id);
        Some(id)
    }

    pub(crate) fn remove_id(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    pub(crate) fn callbacks_for(&self, event: &str) -> Vec<FunctionRef> {
        self.listeners
            .iter()
            .filter(|l| l.event == event)
            .map(|l| Rc::clone(&l.callback))
            .collect()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.listeners.iter().filter(|l| l.event == event).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    fn find(&self, event: &str, callback: &FunctionRef) -> Option<ListenerId> {
        self.listeners
            .iter()
            .find(|l| l.event == event && Rc::ptr_eq(&l.callback, callback))
            .map(|l| l.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_script::{Function, Value};

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut registry = ListenerRegistry::default();
        let cb = Function::native("cb", |_, _| Ok(Value::Undefined));
        let (id, added) = registry.add("resize", Rc::clone(&cb));
        assert!(added);
        assert_eq!(registry.add("resize", Rc::clone(&cb)), (id, false));
        assert_eq!(registry.count("resize"), 1);

        let (_, added) = registry.add("scroll", Rc::clone(&cb));
        assert!(added);
        assert_eq!(registry.remove("resize", &cb), Some(id));
        assert_eq!(registry.len(), 1);
    }
}
