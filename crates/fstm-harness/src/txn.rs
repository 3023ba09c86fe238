//! Scoped transactions over a shared region, and the retry driver.
//!
//! [`TmRegion`] binds one shared region to the engine that created it,
//! with creation and destruction running under the side-operation budget.
//! [`Transaction`] is the scoped begin/commit pair: operations that the
//! engine refuses mark the transaction aborted and surface
//! [`TxFault::Retry`], which [`transactional`] converts into a fresh
//! attempt. Every other fault propagates out of the retry loop unchanged.

use std::sync::Arc;

use fstm_core::{INVALID_SHARED, SharedHandle, TmLibrary};
use fstm_error::{HarnessError, TxFault, TxResult};
use fstm_types::{AllocOutcome, TxHandle};

use crate::bounded::{MAX_SIDE_TIME, bounded_run};

/// Raw pointer wrapper that may cross thread boundaries; used to carry
/// handles through the bounded runner.
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// May only read; the engine admits several concurrently.
    ReadOnly,
    /// May read, write, alloc and free; exclusive in the reference engine.
    ReadWrite,
}

impl TxMode {
    const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

/// One shared memory region bound to the engine that created it.
pub struct TmRegion<L: TmLibrary> {
    lib: Arc<L>,
    shared: SharedHandle,
    start: *mut u8,
    size: usize,
    align: usize,
}

// The handle and start pointer identify engine-managed memory; all access
// goes through the engine, which is Send + Sync by its own contract.
unsafe impl<L: TmLibrary> Send for TmRegion<L> {}
unsafe impl<L: TmLibrary> Sync for TmRegion<L> {}

impl<L: TmLibrary> TmRegion<L> {
    /// Create a region of `size` bytes with word size `align` through
    /// `lib`, under the side-operation budget.
    pub fn create(lib: Arc<L>, align: usize, size: usize) -> Result<Self, HarnessError> {
        if !align.is_power_of_two() || size % align != 0 {
            return Err(HarnessError::RegionCreate);
        }
        let created = {
            let lib = Arc::clone(&lib);
            bounded_run(MAX_SIDE_TIME, "creating the shared memory", move || {
                let shared = lib.create(size, align);
                let start = if shared == INVALID_SHARED {
                    std::ptr::null_mut()
                } else {
                    // Live handle fresh from create.
                    unsafe { lib.start(shared) }
                };
                (SendPtr(shared), SendPtr(start))
            })?
        };
        let (SendPtr(shared), SendPtr(start)) = created;
        if shared == INVALID_SHARED {
            return Err(HarnessError::RegionCreate);
        }
        Ok(Self { lib, shared, start, size, align })
    }

    /// Base address of the region's initial segment.
    #[inline]
    #[must_use]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    /// Size of the initial segment in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Region word size in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }
}

impl<L: TmLibrary> Drop for TmRegion<L> {
    fn drop(&mut self) {
        let lib = Arc::clone(&self.lib);
        let shared = SendPtr(self.shared);
        let destroyed =
            bounded_run(MAX_SIDE_TIME, "destroying the shared memory", move || {
                // The region outlived every transaction; destroy is the
                // last call on this handle.
                let shared = shared;
                unsafe { lib.destroy(shared.0) };
            });
        if let Err(error) = destroyed {
            // Cannot unload a library with a thread stuck inside it; match
            // the driver's quick-exit contract.
            tracing::error!(target: "fstm.measure", %error, "region teardown overran");
            std::process::exit(error.exit_code());
        }
    }
}

impl<L: TmLibrary> std::fmt::Debug for TmRegion<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmRegion")
            .field("start", &self.start)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Live,
    Aborted,
    Finished,
}

/// One pending transaction on a region.
///
/// Dropping a live transaction releases it without committing (the guard
/// for early returns on fatal faults); the normal path is an explicit
/// [`commit`](Self::commit).
pub struct Transaction<'t, L: TmLibrary> {
    tm: &'t TmRegion<L>,
    tx: TxHandle,
    mode: TxMode,
    state: TxState,
}

impl<'t, L: TmLibrary> Transaction<'t, L> {
    /// Begin a transaction on `tm`. Blocks until the engine admits it.
    pub fn begin(tm: &'t TmRegion<L>, mode: TxMode) -> TxResult<Self> {
        // Handle and region are live for the lifetime of `tm`.
        let tx = unsafe { tm.lib.begin(tm.shared, mode.is_read_only()) };
        if !tx.is_valid() {
            return Err(TxFault::Begin);
        }
        Ok(Self { tm, tx, mode, state: TxState::Live })
    }

    /// The region this transaction runs on.
    #[must_use]
    pub fn region(&self) -> &'t TmRegion<L> {
        self.tm
    }

    fn guard_writable(&self) -> TxResult<()> {
        if self.mode.is_read_only() {
            return Err(TxFault::ReadOnlyWrite);
        }
        Ok(())
    }

    /// Copy `size` bytes from shared `src` into private `dst`.
    ///
    /// # Safety
    ///
    /// `src..src+size` must lie within segments of this region and
    /// `dst..dst+size` must be writable private memory.
    pub unsafe fn read(&mut self, src: *const u8, size: usize, dst: *mut u8) -> TxResult<()> {
        if unsafe { self.tm.lib.read(self.tm.shared, self.tx, src, size, dst) } {
            Ok(())
        } else {
            self.state = TxState::Aborted;
            Err(TxFault::Retry)
        }
    }

    /// Copy `size` bytes from private `src` into shared `dst`.
    ///
    /// # Safety
    ///
    /// `dst..dst+size` must lie within segments of this region and
    /// `src..src+size` must be readable private memory.
    pub unsafe fn write(&mut self, src: *const u8, size: usize, dst: *mut u8) -> TxResult<()> {
        self.guard_writable()?;
        if unsafe { self.tm.lib.write(self.tm.shared, self.tx, src, size, dst) } {
            Ok(())
        } else {
            self.state = TxState::Aborted;
            Err(TxFault::Retry)
        }
    }

    /// Allocate a dynamic segment of `size` bytes, returning its payload
    /// address.
    pub fn alloc(&mut self, size: usize) -> TxResult<*mut u8> {
        self.guard_writable()?;
        let mut target: *mut u8 = std::ptr::null_mut();
        // Handle and transaction are live; target is a local out-slot.
        match unsafe { self.tm.lib.alloc(self.tm.shared, self.tx, size, &mut target) } {
            AllocOutcome::Success => Ok(target),
            AllocOutcome::NoMem => Err(TxFault::OutOfMemory),
            AllocOutcome::Abort => {
                self.state = TxState::Aborted;
                Err(TxFault::Retry)
            }
        }
    }

    /// Free the dynamic segment whose payload starts at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a payload address obtained from [`alloc`](Self::alloc)
    /// on this region and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> TxResult<()> {
        self.guard_writable()?;
        if unsafe { self.tm.lib.free(self.tm.shared, self.tx, ptr) } {
            Ok(())
        } else {
            self.state = TxState::Aborted;
            Err(TxFault::Retry)
        }
    }

    /// Commit the transaction. [`TxFault::Retry`] means the engine aborted
    /// it at commit time and the whole attempt must be replayed.
    pub fn commit(mut self) -> TxResult<()> {
        self.state = TxState::Finished;
        // Live transaction begun by us, ended exactly once here.
        if unsafe { self.tm.lib.end(self.tm.shared, self.tx) } {
            Ok(())
        } else {
            Err(TxFault::Retry)
        }
    }
}

impl<L: TmLibrary> Drop for Transaction<'_, L> {
    fn drop(&mut self) {
        // Aborted transactions were already released by the engine;
        // committing consumed `self`. Only a live early exit still holds
        // the transaction open.
        if self.state == TxState::Live {
            let _ = unsafe { self.tm.lib.end(self.tm.shared, self.tx) };
        }
    }
}

/// Run `body` in its own transaction until it commits.
///
/// `Retry` — whether raised by an operation or by commit — begins a fresh
/// attempt; the closure's success value is returned once a commit sticks.
/// All other faults propagate.
pub fn transactional<L, T, F>(tm: &TmRegion<L>, mode: TxMode, mut body: F) -> TxResult<T>
where
    L: TmLibrary,
    F: FnMut(&mut Transaction<'_, L>) -> TxResult<T>,
{
    loop {
        let mut tx = Transaction::begin(tm, mode)?;
        match body(&mut tx) {
            Ok(value) => match tx.commit() {
                Ok(()) => return Ok(value),
                Err(TxFault::Retry) => {}
                Err(fault) => return Err(fault),
            },
            Err(TxFault::Retry) => {}
            Err(fault) => return Err(fault),
        }
    }
}
