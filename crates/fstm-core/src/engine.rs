//! The engine seam: [`TmLibrary`] and the lock-based [`ReferenceTm`].
//!
//! `TmLibrary` is the Rust spelling of the eleven-symbol `tm_*` ABI. The
//! grading harness is generic over it, so alternative engines — optimistic,
//! TL2-style, whatever — plug in by implementing this trait; the reference
//! engine is just the implementation that is trivially correct.
//!
//! Handles are raw: a region is a `*mut u8` (null = invalid), a transaction
//! is a [`TxHandle`] word. Most methods are `unsafe` because they
//! dereference the region handle; the safety contract is uniform and stated
//! once per method.

use fstm_types::{AllocOutcome, TxHandle};

use crate::region::Region;

/// Opaque region handle crossing the engine seam. Null means invalid.
pub type SharedHandle = *mut u8;

/// The invalid region handle.
pub const INVALID_SHARED: SharedHandle = std::ptr::null_mut();

/// The transactional memory engine interface.
///
/// One instance serves any number of regions. Implementations must be
/// callable from any thread; `begin`/`end` pairs are per-thread-of-
/// execution, everything else is keyed by the handles alone.
pub trait TmLibrary: Send + Sync + 'static {
    /// Create a region with a zero-filled initial segment of `size` bytes
    /// and word size `align`. Returns [`INVALID_SHARED`] on failure.
    fn create(&self, size: usize, align: usize) -> SharedHandle;

    /// Destroy `shared`, releasing every segment.
    ///
    /// # Safety
    ///
    /// `shared` must come from [`create`](Self::create) on this engine, not
    /// destroyed since, with no live transaction on it. It is dead after
    /// this call.
    unsafe fn destroy(&self, shared: SharedHandle);

    /// Base address of the initial segment.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region of this engine.
    unsafe fn start(&self, shared: SharedHandle) -> *mut u8;

    /// Size of the initial segment in bytes.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region of this engine.
    unsafe fn size(&self, shared: SharedHandle) -> usize;

    /// Claimed word size of the region in bytes.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region of this engine.
    unsafe fn align(&self, shared: SharedHandle) -> usize;

    /// Begin a transaction; blocks until the region admits it. Returns
    /// [`TxHandle::INVALID`] on failure.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region of this engine.
    unsafe fn begin(&self, shared: SharedHandle, read_only: bool) -> TxHandle;

    /// Commit `tx`. `false` means the transaction aborted and may be
    /// retried.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region of this engine and `tx` a handle
    /// returned by [`begin`](Self::begin) on it, not yet ended, on this
    /// thread of execution.
    unsafe fn end(&self, shared: SharedHandle, tx: TxHandle) -> bool;

    /// Copy `size` bytes from shared `src` to private `dst`. `false` aborts
    /// the transaction.
    ///
    /// # Safety
    ///
    /// `shared`/`tx` as for [`end`](Self::end); `src..src+size` must lie in
    /// segments of the region, `dst..dst+size` in writable private memory.
    unsafe fn read(
        &self,
        shared: SharedHandle,
        tx: TxHandle,
        src: *const u8,
        size: usize,
        dst: *mut u8,
    ) -> bool;

    /// Copy `size` bytes from private `src` to shared `dst`. `false` aborts
    /// the transaction.
    ///
    /// # Safety
    ///
    /// `shared`/`tx` as for [`end`](Self::end); `src..src+size` must be
    /// readable private memory, `dst..dst+size` must lie in segments of the
    /// region, and `tx` must be a read-write transaction.
    unsafe fn write(
        &self,
        shared: SharedHandle,
        tx: TxHandle,
        src: *const u8,
        size: usize,
        dst: *mut u8,
    ) -> bool;

    /// Allocate a dynamic segment of `size` bytes; the payload address
    /// lands in `*target` on success.
    ///
    /// # Safety
    ///
    /// `shared`/`tx` as for [`end`](Self::end); `tx` must be a read-write
    /// transaction.
    unsafe fn alloc(
        &self,
        shared: SharedHandle,
        tx: TxHandle,
        size: usize,
        target: &mut *mut u8,
    ) -> AllocOutcome;

    /// Free the dynamic segment at payload address `ptr`. `false` aborts
    /// the transaction.
    ///
    /// # Safety
    ///
    /// `shared`/`tx` as for [`end`](Self::end); `ptr` must be a payload
    /// address obtained from [`alloc`](Self::alloc) on this region, not
    /// freed since, and `tx` must be a read-write transaction.
    unsafe fn free(&self, shared: SharedHandle, tx: TxHandle, ptr: *mut u8) -> bool;
}

/// The coarse-grained lock-based reference engine.
///
/// One reader/writer lock per region, held from `begin` to `end`. Reads and
/// writes are blind copies; commit never fails; `alloc` never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceTm;

impl ReferenceTm {
    /// Borrow the region behind a live handle.
    ///
    /// # Safety
    ///
    /// `shared` must be a live region handle from [`ReferenceTm::create`].
    #[inline]
    unsafe fn region<'a>(shared: SharedHandle) -> &'a Region {
        unsafe { &*shared.cast::<Region>() }
    }
}

impl TmLibrary for ReferenceTm {
    fn create(&self, size: usize, align: usize) -> SharedHandle {
        match Region::create(size, align) {
            Some(region) => Box::into_raw(region).cast::<u8>(),
            None => INVALID_SHARED,
        }
    }

    unsafe fn destroy(&self, shared: SharedHandle) {
        drop(unsafe { Box::from_raw(shared.cast::<Region>()) });
    }

    unsafe fn start(&self, shared: SharedHandle) -> *mut u8 {
        unsafe { Self::region(shared) }.start_ptr()
    }

    unsafe fn size(&self, shared: SharedHandle) -> usize {
        unsafe { Self::region(shared) }.size()
    }

    unsafe fn align(&self, shared: SharedHandle) -> usize {
        unsafe { Self::region(shared) }.align()
    }

    unsafe fn begin(&self, shared: SharedHandle, read_only: bool) -> TxHandle {
        unsafe { Self::region(shared) }.begin(read_only)
    }

    unsafe fn end(&self, shared: SharedHandle, tx: TxHandle) -> bool {
        unsafe { Self::region(shared).end(tx) }
    }

    unsafe fn read(
        &self,
        _shared: SharedHandle,
        _tx: TxHandle,
        src: *const u8,
        size: usize,
        dst: *mut u8,
    ) -> bool {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, size) };
        true
    }

    unsafe fn write(
        &self,
        _shared: SharedHandle,
        _tx: TxHandle,
        src: *const u8,
        size: usize,
        dst: *mut u8,
    ) -> bool {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, size) };
        true
    }

    unsafe fn alloc(
        &self,
        shared: SharedHandle,
        _tx: TxHandle,
        size: usize,
        target: &mut *mut u8,
    ) -> AllocOutcome {
        unsafe { Self::region(shared) }.alloc_segment(size, target)
    }

    unsafe fn free(&self, shared: SharedHandle, tx: TxHandle, ptr: *mut u8) -> bool {
        debug_assert!(!tx.is_read_only(), "free through a read-only transaction");
        unsafe { Self::region(shared).free_segment(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct TestRegion {
        tm: ReferenceTm,
        shared: SharedHandle,
    }

    impl TestRegion {
        fn new(size: usize, align: usize) -> Self {
            let tm = ReferenceTm;
            let shared = tm.create(size, align);
            assert_ne!(shared, INVALID_SHARED);
            Self { tm, shared }
        }
    }

    impl Drop for TestRegion {
        fn drop(&mut self) {
            unsafe { self.tm.destroy(self.shared) };
        }
    }

    #[test]
    fn create_reports_geometry() {
        let r = TestRegion::new(64, 8);
        unsafe {
            assert_eq!(r.tm.size(r.shared), 64);
            assert_eq!(r.tm.align(r.shared), 8);
            assert!(!r.tm.start(r.shared).is_null());
        }
    }

    #[test]
    fn create_invalid_geometry_is_invalid_shared() {
        assert_eq!(ReferenceTm.create(64, 7), INVALID_SHARED);
        assert_eq!(ReferenceTm.create(0, 8), INVALID_SHARED);
    }

    #[test]
    fn committed_write_is_visible_to_next_transaction() {
        // Scenario: write a marker word in a read-write tx, read it back in
        // a read-only tx.
        let r = TestRegion::new(64, 8);
        let marker = 0xDEAD_BEEF_DEAD_BEEFu64;
        unsafe {
            let start = r.tm.start(r.shared);

            let tx = r.tm.begin(r.shared, false);
            assert!(tx.is_valid());
            let ok = r.tm.write(
                r.shared,
                tx,
                std::ptr::from_ref(&marker).cast::<u8>(),
                8,
                start,
            );
            assert!(ok);
            assert!(r.tm.end(r.shared, tx));

            let tx = r.tm.begin(r.shared, true);
            let mut got = 0u64;
            let ok = r.tm.read(
                r.shared,
                tx,
                start,
                8,
                std::ptr::from_mut(&mut got).cast::<u8>(),
            );
            assert!(ok);
            assert!(r.tm.end(r.shared, tx));
            assert_eq!(got, marker);
        }
    }

    #[test]
    fn alloc_free_alloc_cycle() {
        // Scenario: alloc reads back zeroed, free allows address reuse, and
        // teardown leaks nothing.
        let r = TestRegion::new(16, 8);
        unsafe {
            let tx = r.tm.begin(r.shared, false);
            let mut p1 = std::ptr::null_mut();
            assert_eq!(r.tm.alloc(r.shared, tx, 32, &mut p1), AllocOutcome::Success);
            assert!(r.tm.end(r.shared, tx));

            let tx = r.tm.begin(r.shared, true);
            let mut word = 1u64;
            assert!(r.tm.read(r.shared, tx, p1, 8, std::ptr::from_mut(&mut word).cast()));
            assert!(r.tm.end(r.shared, tx));
            assert_eq!(word, 0, "fresh segment must be zero-filled");

            let tx = r.tm.begin(r.shared, false);
            assert!(r.tm.free(r.shared, tx, p1));
            let mut p2 = std::ptr::null_mut();
            assert_eq!(r.tm.alloc(r.shared, tx, 32, &mut p2), AllocOutcome::Success);
            assert!(r.tm.end(r.shared, tx));
            assert!(!p2.is_null());
            // p2 may or may not equal p1; both are fine.
        }
    }

    #[test]
    fn no_address_handed_out_twice_without_free() {
        let r = TestRegion::new(8, 8);
        let mut seen = std::collections::HashSet::new();
        unsafe {
            let tx = r.tm.begin(r.shared, false);
            for _ in 0..64 {
                let mut p = std::ptr::null_mut();
                assert_eq!(r.tm.alloc(r.shared, tx, 16, &mut p), AllocOutcome::Success);
                assert!(seen.insert(p as usize), "live payload address reused");
            }
            assert!(r.tm.end(r.shared, tx));
        }
    }

    #[test]
    fn single_word_region_supports_all_ops() {
        let align = std::mem::size_of::<usize>();
        let r = TestRegion::new(align, align);
        unsafe {
            let start = r.tm.start(r.shared);
            let tx = r.tm.begin(r.shared, false);
            let v = 7usize;
            assert!(r.tm.write(r.shared, tx, std::ptr::from_ref(&v).cast(), align, start));
            let mut back = 0usize;
            assert!(r.tm.read(r.shared, tx, start, align, std::ptr::from_mut(&mut back).cast()));
            assert_eq!(back, 7);
            let mut p = std::ptr::null_mut();
            assert_eq!(r.tm.alloc(r.shared, tx, align, &mut p), AllocOutcome::Success);
            assert!(r.tm.free(r.shared, tx, p));
            assert!(r.tm.end(r.shared, tx));
        }
    }

    #[test]
    fn read_write_transactions_are_mutually_exclusive() {
        let r = Arc::new(TestRegion::new(8, 8));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let r = Arc::clone(&r);
            let in_flight = Arc::clone(&in_flight);
            handles.push(thread::spawn(move || unsafe {
                for _ in 0..500 {
                    let tx = r.tm.begin(r.shared, false);
                    assert_eq!(in_flight.fetch_add(1, Ordering::AcqRel), 0);
                    // Increment the shared word non-atomically; the lock is
                    // what keeps this coherent.
                    let start = r.tm.start(r.shared);
                    let mut v = 0usize;
                    r.tm.read(r.shared, tx, start, 8, std::ptr::from_mut(&mut v).cast());
                    v += 1;
                    r.tm.write(r.shared, tx, std::ptr::from_ref(&v).cast(), 8, start);
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                    assert!(r.tm.end(r.shared, tx));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        unsafe {
            let tx = r.tm.begin(r.shared, true);
            let start = r.tm.start(r.shared);
            let mut v = 0usize;
            r.tm.read(r.shared, tx, start, 8, std::ptr::from_mut(&mut v).cast());
            assert!(r.tm.end(r.shared, tx));
            assert_eq!(v, 2000, "lost update under the exclusive lock");
        }
    }

    // TestRegion must be shareable for the exclusion test above.
    unsafe impl Send for TestRegion {}
    unsafe impl Sync for TestRegion {}
}
