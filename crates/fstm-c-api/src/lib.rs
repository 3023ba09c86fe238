//! C ABI exports of the reference engine.
//!
//! The eleven `tm_*` symbols, signature-compatible with the grading ABI:
//! `shared_t` is `void*` (null invalid), `tx_t` is `uintptr_t`
//! (`~0` invalid), `tm_alloc` returns `{success = 0, abort = 1, nomem = 2}`.
//! Built as a `cdylib` so a foreign grader can load the reference engine by
//! path and resolve every symbol.

#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::os::raw::c_void;

use fstm_core::{INVALID_SHARED, ReferenceTm, TmLibrary};
use fstm_types::TxHandle;

const TM: ReferenceTm = ReferenceTm;

/// Create a shared memory region.
///
/// Returns null on invalid geometry (`align` not a power of two, `size` not
/// a positive multiple of `align`) or allocator failure.
#[unsafe(no_mangle)]
pub extern "C" fn tm_create(size: usize, align: usize) -> *mut c_void {
    TM.create(size, align).cast::<c_void>()
}

/// Destroy a shared memory region.
///
/// # Safety
/// `shared` must come from [`tm_create`], must not have been destroyed, and
/// must have no live transaction. It is dead after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_destroy(shared: *mut c_void) {
    unsafe { TM.destroy(shared.cast::<u8>()) }
}

/// Base address of the region's initial segment.
///
/// # Safety
/// `shared` must be a live region from [`tm_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_start(shared: *mut c_void) -> *mut c_void {
    unsafe { TM.start(shared.cast::<u8>()) }.cast::<c_void>()
}

/// Size of the region's initial segment, in bytes.
///
/// # Safety
/// `shared` must be a live region from [`tm_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_size(shared: *mut c_void) -> usize {
    unsafe { TM.size(shared.cast::<u8>()) }
}

/// Claimed word size of the region, in bytes.
///
/// # Safety
/// `shared` must be a live region from [`tm_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_align(shared: *mut c_void) -> usize {
    unsafe { TM.align(shared.cast::<u8>()) }
}

/// Begin a transaction. Blocks until the region admits it.
///
/// # Safety
/// `shared` must be a live region from [`tm_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_begin(shared: *mut c_void, is_ro: bool) -> usize {
    unsafe { TM.begin(shared.cast::<u8>(), is_ro) }.into_raw()
}

/// Commit a transaction. `false` means abort-and-retry (never in the
/// reference engine).
///
/// # Safety
/// `shared`/`tx` must be a live region and a transaction begun on it by the
/// calling thread of execution and not yet ended.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_end(shared: *mut c_void, tx: usize) -> bool {
    unsafe { TM.end(shared.cast::<u8>(), TxHandle::from_raw(tx)) }
}

/// Read `size` bytes from shared `source` into private `target`.
///
/// # Safety
/// `shared`/`tx` as for [`tm_end`]; `source..source+size` must lie inside
/// segments of the region and `target..target+size` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_read(
    shared: *mut c_void,
    tx: usize,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    unsafe {
        TM.read(
            shared.cast::<u8>(),
            TxHandle::from_raw(tx),
            source.cast::<u8>(),
            size,
            target.cast::<u8>(),
        )
    }
}

/// Write `size` bytes from private `source` into shared `target`.
///
/// # Safety
/// `shared`/`tx` as for [`tm_end`], with `tx` read-write; `target..target+
/// size` must lie inside segments of the region and `source..source+size`
/// must be readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_write(
    shared: *mut c_void,
    tx: usize,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    unsafe {
        TM.write(
            shared.cast::<u8>(),
            TxHandle::from_raw(tx),
            source.cast::<u8>(),
            size,
            target.cast::<u8>(),
        )
    }
}

/// Allocate a dynamic segment of `size` bytes; the payload address lands in
/// `*target` on success. Returns `0` success, `1` abort, `2` out-of-memory.
///
/// # Safety
/// `shared`/`tx` as for [`tm_end`], with `tx` read-write; `target` must be
/// a valid out-pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_alloc(
    shared: *mut c_void,
    tx: usize,
    size: usize,
    target: *mut *mut c_void,
) -> i32 {
    let mut payload: *mut u8 = std::ptr::null_mut();
    let outcome = unsafe {
        TM.alloc(shared.cast::<u8>(), TxHandle::from_raw(tx), size, &mut payload)
    };
    if outcome == fstm_types::AllocOutcome::Success {
        unsafe { target.write(payload.cast::<c_void>()) };
    }
    outcome.into_raw()
}

/// Free the dynamic segment whose payload starts at `target`.
///
/// # Safety
/// `shared`/`tx` as for [`tm_end`], with `tx` read-write; `target` must be
/// a payload address from [`tm_alloc`] on this region, not freed since.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_free(shared: *mut c_void, tx: usize, target: *mut c_void) -> bool {
    unsafe { TM.free(shared.cast::<u8>(), TxHandle::from_raw(tx), target.cast::<u8>()) }
}

/// The invalid region constant, for symmetry with the Rust-side API.
#[must_use]
pub fn invalid_shared() -> *mut c_void {
    INVALID_SHARED.cast::<c_void>()
}
