use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tracing::trace;

use crate::clock::SharedClock;
use crate::primitives::util::Wakeup;

/// Handle for a pending deadline.
pub type DeadlineId = u64;

/// Runs when a yielded thread is polled after its deadline has passed.
pub type DeadlineCallback = Box<dyn FnOnce(&mut Wakeup<'_>)>;

/// Dead queue entries tolerated beyond twice the live count before a sweep.
const COMPACT_SLACK: usize = 64;

struct Deadline {
    callback: DeadlineCallback,
    due_at: Duration,
}

/// Registry of "resume after N" requests.
///
/// Nothing here fires on its own: a deadline is consumed only when the
/// sequencer polls it with `resolve` at or after its due time.
pub struct YieldTimers {
    clock: SharedClock,
    next_id: DeadlineId,
    pending: HashMap<DeadlineId, Deadline>,
    /// Due times in order. Entries for rejected or resolved ids are dropped
    /// lazily by `prune`.
    queue: BinaryHeap<Reverse<(Duration, DeadlineId)>>,
}

impl YieldTimers {
    pub fn new(clock: SharedClock) -> Self {
        YieldTimers {
            clock,
            next_id: 0,
            pending: HashMap::new(),
            queue: BinaryHeap::new(),
        }
    }

    /// Register `callback` to run once `delay` has passed. Ids increase monotonically.
    pub fn timeout(&mut self, callback: DeadlineCallback, delay: Duration) -> DeadlineId {
        self.next_id += 1;
        let id = self.next_id;
        let due_at = self.clock.now().saturating_add(delay);
        self.pending.insert(id, Deadline { callback, due_at });
        self.queue.push(Reverse((due_at, id)));
        trace!(deadline = id, ?delay, "registered deadline");
        id
    }

    /// Take the callback for `id` if it is due. A deadline that is not yet due
    /// stays registered.
    pub fn resolve(&mut self, id: DeadlineId) -> Option<DeadlineCallback> {
        let now = self.clock.now();
        let due = self.pending.get(&id).is_some_and(|d| now >= d.due_at);
        if !due {
            return None;
        }
        let callback = self.pending.remove(&id).map(|d| d.callback);
        self.prune();
        callback
    }

    /// Drop a deadline without running its callback.
    pub fn reject(&mut self, id: DeadlineId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            trace!(deadline = id, "rejected deadline");
            self.prune();
        }
        removed
    }

    /// Discard queue entries whose deadline is gone. Heads are popped as they
    /// go stale; dead entries buried deeper are swept once they outnumber the
    /// live ones.
    fn prune(&mut self) {
        while let Some(Reverse((due_at, id))) = self.queue.peek().copied() {
            if self.is_live(due_at, id) {
                break;
            }
            self.queue.pop();
        }
        if self.queue.len() > 2 * self.pending.len() + COMPACT_SLACK {
            let pending = &self.pending;
            self.queue
                .retain(|Reverse((due_at, id))| pending.get(id).is_some_and(|d| d.due_at == *due_at));
        }
    }

    fn is_live(&self, due_at: Duration, id: DeadlineId) -> bool {
        self.pending.get(&id).is_some_and(|d| d.due_at == due_at)
    }

    pub fn reject_all(&mut self) {
        self.pending.clear();
        self.queue.clear();
    }

    pub fn is_pending(&self, id: DeadlineId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Earliest due time among pending deadlines.
    pub fn next_due(&mut self) -> Option<Duration> {
        self.prune();
        self.queue.peek().map(|Reverse((due_at, _))| *due_at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;

    fn noop() -> DeadlineCallback {
        Box::new(|_| {})
    }

    #[test]
    fn resolves_only_once_due() {
        let clock = Rc::new(ManualClock::new());
        let mut timers = YieldTimers::new(clock.clone());
        let id = timers.timeout(noop(), Duration::from_millis(100));

        assert!(timers.resolve(id).is_none());
        clock.advance(Duration::from_millis(99));
        assert!(timers.resolve(id).is_none());
        clock.advance(Duration::from_millis(1));
        assert!(timers.resolve(id).is_some());
        assert!(!timers.is_pending(id));
        assert!(timers.resolve(id).is_none());
    }

    #[test]
    fn ids_increase_and_reject_removes_entry() {
        let clock = Rc::new(ManualClock::new());
        let mut timers = YieldTimers::new(clock.clone());
        let a = timers.timeout(noop(), Duration::ZERO);
        let b = timers.timeout(noop(), Duration::ZERO);
        assert!(b > a);

        assert!(timers.reject(a));
        assert!(!timers.reject(a));
        assert!(timers.resolve(a).is_none());
        assert_eq!(timers.len(), 1);

        timers.reject_all();
        assert!(timers.is_empty());
        assert!(timers.resolve(b).is_none());
    }

    #[test]
    fn next_due_skips_rejected_entries() {
        let clock = Rc::new(ManualClock::new());
        let mut timers = YieldTimers::new(clock.clone());
        let early = timers.timeout(noop(), Duration::from_millis(10));
        timers.timeout(noop(), Duration::from_millis(50));

        assert_eq!(timers.next_due(), Some(Duration::from_millis(10)));
        timers.reject(early);
        assert_eq!(timers.next_due(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn queue_stays_bounded_across_many_waits() {
        let clock = Rc::new(ManualClock::new());
        let mut timers = YieldTimers::new(clock.clone());
        for _ in 0..10_000 {
            let id = timers.timeout(noop(), Duration::ZERO);
            assert!(timers.resolve(id).is_some());
        }
        assert!(timers.is_empty());
        assert_eq!(timers.queue.len(), 0);
    }

    #[test]
    fn rejected_deadlines_behind_a_live_one_are_swept() {
        let clock = Rc::new(ManualClock::new());
        let mut timers = YieldTimers::new(clock.clone());
        let long = timers.timeout(noop(), Duration::from_secs(60));
        for _ in 0..10_000 {
            let id = timers.timeout(noop(), Duration::from_secs(120));
            timers.reject(id);
        }
        assert_eq!(timers.len(), 1);
        assert!(timers.queue.len() <= 2 + COMPACT_SLACK);
        assert!(timers.is_pending(long));
        assert_eq!(timers.next_due(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn oversized_delays_saturate() {
        let clock = Rc::new(ManualClock::new());
        clock.advance(Duration::from_secs(1));
        let mut timers = YieldTimers::new(clock.clone());
        let id = timers.timeout(noop(), Duration::MAX);
        assert_eq!(timers.next_due(), Some(Duration::MAX));
        assert!(timers.resolve(id).is_none());
    }
}
