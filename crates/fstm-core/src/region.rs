//! Shared region lifecycle and segment management.
//!
//! A region owns one initial segment, created with the region and never
//! freed before it, plus a list of dynamic segments allocated inside
//! transactions. Backing storage comes straight from the global allocator
//! with an alignment of at least the region word size and at least the
//! segment header alignment, so a header can always sit in front of a
//! payload without misaligning either.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

use parking_lot::Mutex;

use fstm_types::{AllocOutcome, TxHandle};

use crate::lock::RegionLock;
use crate::seglist::{SegmentHeader, SegmentList};

/// One transactional shared memory region.
pub struct Region {
    start: NonNull<u8>,
    start_layout: Layout,
    size: usize,
    align: usize,
    align_alloc: usize,
    delta_alloc: usize,
    lock: RegionLock,
    /// Dynamic segment bookkeeping. The exclusive region lock already
    /// serializes alloc/free in well-behaved runs; the mutex keeps the
    /// list coherent even against a caller that breaks the read-write
    /// protocol.
    allocs: Mutex<SegmentList>,
}

// The initial segment and every dynamic payload are plain bytes; all
// mutation of region bookkeeping goes through `lock` and `allocs`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region with a zero-filled initial segment of `size` bytes
    /// and a claimed word size of `align`.
    ///
    /// `align` must be a non-zero power of two and must divide `size`;
    /// `size` must be non-zero. Returns `None` on invalid geometry or
    /// allocator failure.
    #[must_use]
    pub fn create(size: usize, align: usize) -> Option<Box<Self>> {
        if size == 0 || !align.is_power_of_two() || size % align != 0 {
            return None;
        }
        // Dynamic segments carry a header in front of the payload, so every
        // allocation is aligned for the header as well as the region word.
        let align_alloc = align.max(std::mem::align_of::<SegmentHeader>());
        let delta_alloc = std::mem::size_of::<SegmentHeader>().div_ceil(align_alloc) * align_alloc;

        let start_layout = Layout::from_size_align(size, align_alloc).ok()?;
        let start = NonNull::new(unsafe { alloc_zeroed(start_layout) })?;

        tracing::debug!(
            target: "fstm.engine",
            size,
            align,
            align_alloc,
            start = ?start.as_ptr(),
            "region created"
        );

        Some(Box::new(Self {
            start,
            start_layout,
            size,
            align,
            align_alloc,
            delta_alloc,
            lock: RegionLock::new(),
            allocs: Mutex::new(SegmentList::new()),
        }))
    }

    /// Base address of the initial segment.
    #[inline]
    #[must_use]
    pub fn start_ptr(&self) -> *mut u8 {
        self.start.as_ptr()
    }

    /// Size of the initial segment in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Claimed word size of the region in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Number of live dynamic segments.
    #[must_use]
    pub fn dynamic_segments(&self) -> usize {
        self.allocs.lock().len()
    }

    /// Acquire the region lock for a transaction and hand out the matching
    /// sentinel handle.
    #[inline]
    pub fn begin(&self, read_only: bool) -> TxHandle {
        if read_only {
            self.lock.acquire_shared();
            TxHandle::READ_ONLY
        } else {
            self.lock.acquire_exclusive();
            TxHandle::READ_WRITE
        }
    }

    /// Release the region lock for `tx`. Always commits: under a global
    /// lock there is nothing to conflict with.
    ///
    /// # Safety
    ///
    /// `tx` must be the handle returned by a [`begin`](Self::begin) on this
    /// region that has not been ended yet, on this thread of execution.
    #[inline]
    pub unsafe fn end(&self, tx: TxHandle) -> bool {
        if tx.is_read_only() {
            unsafe { self.lock.release_shared() };
        } else {
            unsafe { self.lock.release_exclusive() };
        }
        true
    }

    /// Allocate a dynamic segment with a zero-filled payload of `size`
    /// bytes. On success the payload address is stored in `*target`.
    pub fn alloc_segment(&self, size: usize, target: &mut *mut u8) -> AllocOutcome {
        let Ok(layout) = Layout::from_size_align(self.delta_alloc + size, self.align_alloc) else {
            return AllocOutcome::NoMem;
        };
        let Some(base) = NonNull::new(unsafe { alloc_zeroed(layout) }) else {
            return AllocOutcome::NoMem;
        };
        let header = base.cast::<SegmentHeader>();
        unsafe {
            header.as_ptr().write(SegmentHeader::unlinked(layout));
            self.allocs.lock().push_front(header);
        }
        let payload = unsafe { base.as_ptr().add(self.delta_alloc) };

        tracing::debug!(
            target: "fstm.engine",
            size,
            payload = ?payload,
            "segment allocated"
        );

        *target = payload;
        AllocOutcome::Success
    }

    /// Free the dynamic segment whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be an address previously returned by
    /// [`alloc_segment`](Self::alloc_segment) on this region and not freed
    /// since. The initial segment is not a dynamic segment and must never
    /// be passed here.
    pub unsafe fn free_segment(&self, payload: *mut u8) -> bool {
        debug_assert!(payload != self.start.as_ptr(), "freeing the initial segment");
        let base = unsafe { payload.sub(self.delta_alloc) };
        let header = unsafe { NonNull::new_unchecked(base.cast::<SegmentHeader>()) };
        let layout = unsafe {
            self.allocs.lock().unlink(header);
            header.as_ref().layout()
        };
        unsafe { dealloc(base, layout) };

        tracing::debug!(target: "fstm.engine", payload = ?payload, "segment freed");
        true
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let list = self.allocs.get_mut();
        let mut freed = 0usize;
        while let Some(header) = list.pop_front() {
            let layout = unsafe { header.as_ref().layout() };
            unsafe { dealloc(header.as_ptr().cast::<u8>(), layout) };
            freed += 1;
        }
        unsafe { dealloc(self.start.as_ptr(), self.start_layout) };
        tracing::debug!(
            target: "fstm.engine",
            dynamic_segments = freed,
            "region destroyed"
        );
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start.as_ptr())
            .field("size", &self.size)
            .field("align", &self.align)
            .field("align_alloc", &self.align_alloc)
            .finish_non_exhaustive()
    }
}
