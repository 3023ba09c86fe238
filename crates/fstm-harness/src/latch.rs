//! Waitable latch for last-worker → master hand-off.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A resettable latch.
///
/// The last worker of a phase raises it; the master waits on it, optionally
/// with a deadline, and resets it for the next phase on the way out. The
/// mutex/condvar pair gives the release/acquire edge between the raiser and
/// the waiter.
#[derive(Debug, Default)]
pub struct Latch {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    /// A lowered latch.
    #[must_use]
    pub const fn new() -> Self {
        Self { raised: Mutex::new(false), cv: Condvar::new() }
    }

    /// Raise the latch, waking every waiter. No-op if already raised.
    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cv.notify_all();
    }

    /// Wait for the latch to be raised, then reset it.
    ///
    /// With a deadline, returns `false` if it elapsed before the latch was
    /// raised (the latch is left untouched in that case).
    pub fn wait(&self, deadline: Option<Duration>) -> bool {
        let mut raised = self.raised.lock();
        match deadline {
            None => {
                self.cv.wait_while(&mut raised, |raised| !*raised);
            }
            Some(limit) => {
                if self.cv.wait_while_for(&mut raised, |raised| !*raised, limit).timed_out() {
                    return false;
                }
            }
        }
        *raised = false;
        true
    }
}
