//! The single system-wide slot held by a running parallel job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// At most one parallel job holds this at a time. Waiting is cancellable.
#[derive(Debug, Default)]
pub struct ParallelSlot {
    busy: Mutex<bool>,
    freed: Condvar,
}

impl ParallelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the slot is free, waking every `poll` to check `cancel`.
    ///
    /// Returns `None` if `cancel` was set before the slot was obtained.
    pub fn acquire(&self, cancel: &AtomicBool, poll: Duration) -> Option<SlotGuard<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            if !*busy {
                *busy = true;
                return Some(SlotGuard { slot: self });
            }
            busy = self
                .freed
                .wait_timeout(busy, poll)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Take the slot only if it is free right now.
    pub fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *busy {
            return None;
        }
        *busy = true;
        Some(SlotGuard { slot: self })
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self) {
        let mut busy = self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *busy = false;
        self.freed.notify_all();
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    slot: &'a ParallelSlot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}
