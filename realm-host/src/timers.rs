//! Timer queue driven by a virtual millisecond clock.

use realm_script::{FunctionRef, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier returned to scripts by `setTimeout` / `setInterval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Timer {
    pub(crate) callback: FunctionRef,
    pub(crate) args: Vec<Value>,
    pub(crate) due: u64,
    pub(crate) interval: Option<u64>,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    now: u64,
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
}

impl TimerQueue {
    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    pub(crate) fn schedule(
        &mut self,
        callback: FunctionRef,
        args: Vec<Value>,
        delay_ms: u64,
        repeat: bool,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.insert(
            id,
            Timer {
                callback,
                args,
                due: self.now + delay_ms,
                interval: repeat.then_some(delay_ms.max(1)),
            },
        );
        id
    }

    pub(crate) fn clear(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Takes the earliest timer due at or before `until`, advancing the clock
    /// to its due time. Intervals are rescheduled in place.
    pub(crate) fn pop_due(&mut self, until: u64) -> Option<(TimerId, FunctionRef, Vec<Value>)> {
        let (&id, _) = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(id, t)| (t.due, **id))?;
        let timer = self.timers.get_mut(&id)?;
        self.now = self.now.max(timer.due);
        let fired = (id, timer.callback.clone(), timer.args.clone());
        match timer.interval {
            Some(interval) => timer.due += interval,
            None => {
                self.timers.remove(&id);
            }
        }
        Some(fired)
    }

    pub(crate) fn set_now(&mut self, now: u64) {
        self.now = self.now.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_script::Function;

    fn noop() -> FunctionRef {
        Function::native("noop", |_, _| Ok(Value::Undefined))
    }

    #[test]
    fn fires_in_due_order_then_id_order() {
        let mut queue = TimerQueue::default();
        let late = queue.schedule(noop(), vec![], 20, false);
        let early_a = queue.schedule(noop(), vec![], 10, false);
        let early_b = queue.schedule(noop(), vec![], 10, false);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_due(100).map(|(id, ..)| id)).collect();
        assert_eq!(order, vec![early_a, early_b, late]);
        assert_eq!(queue.now(), 20);
    }

    #[test]
    fn intervals_reschedule_until_cleared() {
        let mut queue = TimerQueue::default();
        let id = queue.schedule(noop(), vec![], 5, true);
        let mut fired = 0;
        while queue.pop_due(21).is_some() {
            fired += 1;
        }
        assert_eq!(fired, 4);
        assert!(queue.clear(id));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn timers_not_yet_due_stay_pending() {
        let mut queue = TimerQueue::default();
        let id = queue.schedule(noop(), vec![], 1000, false);
        assert!(queue.pop_due(999).is_none());
        assert!(queue.contains(id));
    }
}
