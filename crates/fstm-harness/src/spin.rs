//! Spin primitives: a short CPU pause and a reusable two-phase barrier.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Pause for a very short amount of time.
///
/// Yields to the scheduler rather than spinning on a CPU hint: worker
/// counts match the hardware concurrency, so an oversubscribed spin would
/// starve the very thread it is waiting for.
#[inline]
pub fn short_pause() {
    std::thread::yield_now();
}

const MODE_ENTER: u8 = 0;
const MODE_LEAVE: u8 = 1;

/// Reusable spin barrier.
///
/// Two phases per crossing: all threads first gather (enter), then all
/// threads disperse (leave). The second phase is what makes the barrier
/// reusable — a fast thread cannot lap the group and slip into the next
/// crossing while a slow thread is still leaving this one.
pub struct SpinBarrier {
    cardinal: u32,
    step: AtomicU32,
    mode: AtomicU8,
}

impl SpinBarrier {
    /// Barrier for `cardinal` threads. `cardinal` must be non-zero.
    #[must_use]
    pub const fn new(cardinal: u32) -> Self {
        Self { cardinal, step: AtomicU32::new(0), mode: AtomicU8::new(MODE_ENTER) }
    }

    /// Block until all `cardinal` threads have called `sync`.
    pub fn sync(&self) {
        // Enter: the last arriver flips to leave mode.
        if self.step.fetch_add(1, Ordering::Relaxed) + 1 == self.cardinal {
            self.mode.store(MODE_LEAVE, Ordering::Release);
        } else {
            while self.mode.load(Ordering::Acquire) != MODE_LEAVE {
                short_pause();
            }
        }
        // Leave: the last leaver re-arms the barrier.
        if self.step.fetch_sub(1, Ordering::Relaxed) - 1 == 0 {
            self.mode.store(MODE_ENTER, Ordering::Release);
        } else {
            while self.mode.load(Ordering::Acquire) != MODE_ENTER {
                short_pause();
            }
        }
    }
}

impl std::fmt::Debug for SpinBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinBarrier")
            .field("cardinal", &self.cardinal)
            .finish_non_exhaustive()
    }
}
