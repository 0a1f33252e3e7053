//! Stop-the-world thread engagement protocol (spec.md §3.7, §4.6).
//!
//! A collection cycle moves the whole instance through a sequence of
//! `HeapState`s. Mutators normally run with `ThreadGcState::Inactive`; the
//! thread driving a cycle flips the heap to `Init`, waits (via the
//! engagement condition variable) for every other thread's `Ctx` to
//! transition out of any in-flight allocation and acknowledge, then proceeds
//! through `Mark`/`Evacuate`/`Update` before releasing everyone back to
//! `Inactive`. Modeled on the teacher crate's `safepoint.rs`, generalized
//! from a single global pause flag to the multi-phase state machine spec.md
//! §4.6 requires.
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Instance-wide collection phase (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeapState {
    Inactive = 0,
    Init = 1,
    Mark = 2,
    Evacuate = 3,
    Update = 4,
}

impl HeapState {
    fn from_u8(v: u8) -> HeapState {
        match v {
            1 => HeapState::Init,
            2 => HeapState::Mark,
            3 => HeapState::Evacuate,
            4 => HeapState::Update,
            _ => HeapState::Inactive,
        }
    }
}

/// Shared engagement bookkeeping for one [`crate::instance::Instance`].
///
/// `engagement_cv` wakes mutators blocked on `suspend_context`'s caller (a
/// collector waiting for stragglers) and on `resume_context` (a mutator
/// waiting for the cycle to finish); `helper_cv` separately wakes threads
/// parked in `help_gc` once marking work becomes available, so a thread
/// idling for help doesn't spuriously wake on every engagement transition.
pub struct Engagement {
    state: AtomicU8,
    /// Count of threads still running mutator code that the collector is
    /// waiting to see reach a safepoint before advancing past `Init`.
    threads_to_stop: AtomicUsize,
    lock: Mutex<()>,
    engagement_cv: Condvar,
    helper_cv: Condvar,
}

impl Engagement {
    pub fn new() -> Engagement {
        Engagement {
            state: AtomicU8::new(HeapState::Inactive as u8),
            threads_to_stop: AtomicUsize::new(0),
            lock: Mutex::new(()),
            engagement_cv: Condvar::new(),
            helper_cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> HeapState {
        HeapState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advances the instance to `next`, waking every thread parked on the
    /// engagement condvar so they can re-check whether they should proceed,
    /// stay suspended, or help.
    pub fn advance(&self, next: HeapState) {
        let _guard = self.lock.lock();
        self.state.store(next as u8, Ordering::Release);
        self.engagement_cv.notify_all();
        if next == HeapState::Mark {
            self.helper_cv.notify_all();
        }
    }

    /// Called by the thread initiating a cycle: records how many other
    /// threads must reach a safepoint before marking can start.
    pub fn begin_stop(&self, expected: usize) {
        self.threads_to_stop.store(expected, Ordering::Release);
    }

    /// Called by a mutator thread reaching a safepoint (spec.md
    /// `suspend_context`): decrements the outstanding count and wakes the
    /// collector if it was the last straggler.
    pub fn acknowledge_stop(&self) {
        let _guard = self.lock.lock();
        if self.threads_to_stop.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.engagement_cv.notify_all();
        }
    }

    /// Blocks the calling (collector) thread until every mutator has
    /// acknowledged the stop request.
    pub fn wait_for_stop(&self) {
        let mut guard = self.lock.lock();
        while self.threads_to_stop.load(Ordering::Acquire) > 0 {
            self.engagement_cv.wait(&mut guard);
        }
    }

    /// Blocks the calling (mutator) thread until the instance leaves a
    /// collecting state (spec.md `resume_context`).
    pub fn wait_until_inactive(&self) {
        let mut guard = self.lock.lock();
        while self.state() != HeapState::Inactive {
            self.engagement_cv.wait(&mut guard);
        }
    }

    /// Blocks a helper thread (spec.md `help_gc`) until marking work is
    /// available or the cycle has finished.
    pub fn wait_for_help(&self) {
        let mut guard = self.lock.lock();
        while self.state() != HeapState::Mark && self.state() != HeapState::Inactive {
            self.helper_cv.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn advance_transitions_state() {
        let eng = Engagement::new();
        assert_eq!(eng.state(), HeapState::Inactive);
        eng.advance(HeapState::Init);
        assert_eq!(eng.state(), HeapState::Init);
        eng.advance(HeapState::Mark);
        assert_eq!(eng.state(), HeapState::Mark);
    }

    #[test]
    fn wait_for_stop_returns_once_all_acknowledge() {
        let eng = Arc::new(Engagement::new());
        eng.begin_stop(3);
        let mut handles = vec![];
        for _ in 0..3 {
            let eng = eng.clone();
            handles.push(thread::spawn(move || eng.acknowledge_stop()));
        }
        eng.wait_for_stop();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(eng.threads_to_stop.load(Ordering::Acquire), 0);
    }

    #[test]
    fn wait_until_inactive_unblocks_on_advance_back() {
        let eng = Arc::new(Engagement::new());
        eng.advance(HeapState::Mark);
        let waiter = {
            let eng = eng.clone();
            thread::spawn(move || eng.wait_until_inactive())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        eng.advance(HeapState::Inactive);
        waiter.join().unwrap();
    }
}
