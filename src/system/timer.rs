use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub type TimerCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Same-tick replacement for `setTimeout`: callbacks never wait for wall-clock
/// time, they run in scheduling order when the queue is drained.
#[derive(Default)]
pub struct TimerQueue {
    pending: Mutex<BTreeMap<u64, TimerCallback>>,
    next_id: AtomicU64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timeout(&self, callback: TimerCallback) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(id, callback);
        TimerId(id)
    }

    /// Returns false if the timer already ran or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.pending.lock().remove(&id.0).is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run callbacks until none are pending, including ones scheduled by the
    /// callbacks themselves. Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending.lock().pop_first();
            let Some((_, callback)) = next else {
                break;
            };
            callback();
            ran += 1;
        }
        ran
    }
}
