//! Reader/writer lock with a handle-based acquire/release protocol.
//!
//! The engine ABI acquires the region lock in `begin` and releases it in
//! `end` — two separate calls, possibly traversing a C boundary in between.
//! Guard-style locks cannot express that, so this wraps the raw
//! `parking_lot` rwlock and exposes matching acquire/release pairs. The
//! release half is `unsafe`: nothing but the caller's discipline ties a
//! release to a prior acquire in the same mode.

use parking_lot::lock_api::RawRwLock as _;

/// The region-wide reader/writer lock.
///
/// Shared mode serves read-only transactions; exclusive mode serves
/// read-write transactions. Fairness and blocking behavior are whatever
/// `parking_lot` provides; the engine needs neither writer preference nor
/// timeouts here.
pub struct RegionLock {
    raw: parking_lot::RawRwLock,
}

impl RegionLock {
    /// A fresh, unlocked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: parking_lot::RawRwLock::INIT }
    }

    /// Block until the lock is held in shared mode.
    #[inline]
    pub fn acquire_shared(&self) {
        self.raw.lock_shared();
    }

    /// Block until the lock is held in exclusive mode.
    #[inline]
    pub fn acquire_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Release a shared acquisition.
    ///
    /// # Safety
    ///
    /// The current thread context must hold the lock in shared mode from a
    /// prior [`acquire_shared`](Self::acquire_shared) that has not been
    /// released yet.
    #[inline]
    pub unsafe fn release_shared(&self) {
        unsafe { self.raw.unlock_shared() }
    }

    /// Release an exclusive acquisition.
    ///
    /// # Safety
    ///
    /// The current thread context must hold the lock in exclusive mode from
    /// a prior [`acquire_exclusive`](Self::acquire_exclusive) that has not
    /// been released yet.
    #[inline]
    pub unsafe fn release_exclusive(&self) {
        unsafe { self.raw.unlock_exclusive() }
    }
}

impl Default for RegionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionLock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn shared_acquisitions_overlap() {
        let lock = RegionLock::new();
        lock.acquire_shared();
        lock.acquire_shared();
        unsafe {
            lock.release_shared();
            lock.release_shared();
        }
        // Exclusive must be available again afterwards.
        lock.acquire_exclusive();
        unsafe { lock.release_exclusive() };
    }

    #[test]
    fn exclusive_excludes_everyone() {
        let lock = Arc::new(RegionLock::new());
        let in_critical = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let in_critical = Arc::clone(&in_critical);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    lock.acquire_exclusive();
                    let seen = in_critical.fetch_add(1, Ordering::AcqRel);
                    assert_eq!(seen, 0, "two writers inside the critical section");
                    in_critical.fetch_sub(1, Ordering::AcqRel);
                    unsafe { lock.release_exclusive() };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn writer_waits_for_readers() {
        let lock = Arc::new(RegionLock::new());
        lock.acquire_shared();

        let writer_done = Arc::new(AtomicU32::new(0));
        let writer = {
            let lock = Arc::clone(&lock);
            let writer_done = Arc::clone(&writer_done);
            thread::spawn(move || {
                lock.acquire_exclusive();
                writer_done.store(1, Ordering::Release);
                unsafe { lock.release_exclusive() };
            })
        };

        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(writer_done.load(Ordering::Acquire), 0);

        unsafe { lock.release_shared() };
        writer.join().unwrap();
        assert_eq!(writer_done.load(Ordering::Acquire), 1);
    }
}
