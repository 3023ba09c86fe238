//! Typed accessors over words in shared memory.
//!
//! A workload sees the region as raw bytes; these accessors give it typed,
//! alignment-checked reads and writes of single words, link slots and word
//! arrays. Binding an accessor checks the address against both the region
//! word size and the native alignment of the accessed type — a misaligned
//! bind is a fail-fast fault, not a retry.
//!
//! The unsafety of raw transactional copies is contained here: workloads
//! only ever touch shared memory through a bound accessor.

use std::marker::PhantomData;
use std::mem::MaybeUninit;

use fstm_core::TmLibrary;
use fstm_error::{TxFault, TxResult};
use fstm_types::Addr;

use crate::txn::Transaction;

/// Marker for plain word types that may live in shared memory.
///
/// # Safety
///
/// Implementors must be `Copy`, free of padding and valid for every bit
/// pattern — the accessor materializes values straight from raw bytes.
pub unsafe trait TxWord: Copy + 'static {}

unsafe impl TxWord for usize {}
unsafe impl TxWord for u64 {}
unsafe impl TxWord for i64 {}
unsafe impl TxWord for Addr {}

fn check_bind<T: TxWord>(region_align: usize, addr: *mut u8) -> TxResult<()> {
    let raw = addr as usize;
    if raw % region_align != 0 {
        return Err(TxFault::Misaligned { addr: raw, align: region_align });
    }
    let native = std::mem::align_of::<T>();
    if raw % native != 0 {
        return Err(TxFault::Misaligned { addr: raw, align: native });
    }
    Ok(())
}

/// A single typed word at a fixed shared address.
#[derive(Clone, Copy, Debug)]
pub struct SharedWord<T: TxWord> {
    addr: *mut u8,
    _type: PhantomData<*mut T>,
}

impl<T: TxWord> SharedWord<T> {
    /// Bind the word at `addr`, checking alignment against the region word
    /// size and the native alignment of `T`.
    pub fn bind(region_align: usize, addr: *mut u8) -> TxResult<Self> {
        check_bind::<T>(region_align, addr)?;
        Ok(Self { addr, _type: PhantomData })
    }

    /// The bound shared address.
    #[must_use]
    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    /// Read the word into a private copy.
    pub fn read<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>) -> TxResult<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        // SAFETY: the bind-time checks pin `addr` to an aligned word the
        // workload derived from the region; the slot is a fresh private
        // word of exactly `size_of::<T>()` bytes.
        unsafe {
            tx.read(self.addr, std::mem::size_of::<T>(), slot.as_mut_ptr().cast::<u8>())?;
            Ok(slot.assume_init())
        }
    }

    /// Write a private value into the word.
    pub fn write<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>, value: T) -> TxResult<()> {
        // SAFETY: as in `read`; the source is a live private word.
        unsafe {
            tx.write(
                std::ptr::from_ref(&value).cast::<u8>(),
                std::mem::size_of::<T>(),
                self.addr,
            )
        }
    }

    /// Address of the first byte after this word.
    #[must_use]
    pub fn after(&self) -> *mut u8 {
        self.addr.wrapping_add(std::mem::size_of::<T>())
    }
}

/// A word holding a link to another shared segment.
///
/// Allocation and freeing go through the slot so the link can never dangle:
/// `alloc` refuses to overwrite a live link, `free` nulls the slot it
/// frees.
#[derive(Clone, Copy)]
pub struct SharedPtr {
    word: SharedWord<Addr>,
}

impl SharedPtr {
    /// Bind the link slot at `addr`.
    pub fn bind(region_align: usize, addr: *mut u8) -> TxResult<Self> {
        Ok(Self { word: SharedWord::bind(region_align, addr)? })
    }

    /// Read the link.
    pub fn read<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>) -> TxResult<Addr> {
        self.word.read(tx)
    }

    /// Overwrite the link.
    pub fn write<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>, link: Addr) -> TxResult<()> {
        self.word.write(tx, link)
    }

    /// Allocate a segment of `size` bytes and store its address in the
    /// slot. Fails fast if the slot already holds a link.
    pub fn alloc<L: TmLibrary>(
        &self,
        tx: &mut Transaction<'_, L>,
        size: usize,
    ) -> TxResult<*mut u8> {
        if !self.read(tx)?.is_null() {
            return Err(TxFault::DoubleAlloc);
        }
        let payload = tx.alloc(size)?;
        self.word.write(tx, Addr::from_ptr(payload))?;
        Ok(payload)
    }

    /// Free the segment the slot links to and null the slot. Fails fast on
    /// a null link.
    pub fn free<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>) -> TxResult<()> {
        let Some(payload) = self.read(tx)?.as_ptr() else {
            return Err(TxFault::DoubleFree);
        };
        // SAFETY: a non-null link in a slot managed by this accessor was
        // stored by `alloc` from a live segment and nulled on free.
        unsafe { tx.free(payload)? };
        self.word.write(tx, Addr::NULL)
    }

    /// Address of the first byte after this slot.
    #[must_use]
    pub fn after(&self) -> *mut u8 {
        self.word.after()
    }
}

/// An unsized run of typed words starting at a fixed shared address.
#[derive(Clone, Copy)]
pub struct SharedArray<T: TxWord> {
    base: *mut u8,
    region_align: usize,
    _type: PhantomData<*mut T>,
}

impl<T: TxWord> SharedArray<T> {
    /// Bind the array starting at `addr`.
    pub fn bind(region_align: usize, addr: *mut u8) -> TxResult<Self> {
        check_bind::<T>(region_align, addr)?;
        Ok(Self { base: addr, region_align, _type: PhantomData })
    }

    /// Shared address of element `index`.
    #[must_use]
    pub fn slot_addr(&self, index: usize) -> *mut u8 {
        self.base.wrapping_add(index * std::mem::size_of::<T>())
    }

    /// Accessor for element `index`.
    pub fn slot(&self, index: usize) -> TxResult<SharedWord<T>> {
        SharedWord::bind(self.region_align, self.slot_addr(index))
    }

    /// Read element `index`.
    pub fn read<L: TmLibrary>(&self, tx: &mut Transaction<'_, L>, index: usize) -> TxResult<T> {
        self.slot(index)?.read(tx)
    }

    /// Write element `index`.
    pub fn write<L: TmLibrary>(
        &self,
        tx: &mut Transaction<'_, L>,
        index: usize,
        value: T,
    ) -> TxResult<()> {
        self.slot(index)?.write(tx, value)
    }

    /// Address of the first byte after `len` elements.
    #[must_use]
    pub fn after(&self, len: usize) -> *mut u8 {
        self.slot_addr(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{TmRegion, TxMode, transactional};
    use fstm_core::ReferenceTm;
    use std::sync::Arc;

    fn region(size: usize, align: usize) -> TmRegion<ReferenceTm> {
        TmRegion::create(Arc::new(ReferenceTm), align, size).unwrap()
    }

    #[test]
    fn misaligned_bind_is_rejected() {
        let tm = region(64, 8);
        let odd = tm.start().wrapping_add(3);
        let fault = SharedWord::<u64>::bind(tm.align(), odd).unwrap_err();
        assert!(matches!(fault, TxFault::Misaligned { align: 8, .. }));
    }

    #[test]
    fn word_round_trip() {
        let tm = region(64, 8);
        transactional(&tm, TxMode::ReadWrite, |tx| {
            let word = SharedWord::<u64>::bind(tm.align(), tm.start())?;
            word.write(tx, 1234)?;
            assert_eq!(word.read(tx)?, 1234);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn array_addresses_words() {
        let tm = region(64, 8);
        transactional(&tm, TxMode::ReadWrite, |tx| {
            let array = SharedArray::<i64>::bind(tm.align(), tm.start())?;
            for i in 0..8 {
                array.write(tx, i, i as i64 * 10)?;
            }
            for i in 0..8 {
                assert_eq!(array.read(tx, i)?, i as i64 * 10);
            }
            assert_eq!(array.after(8), tm.start().wrapping_add(64));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn ptr_alloc_free_discipline() {
        let tm = region(8, 8);
        transactional(&tm, TxMode::ReadWrite, |tx| {
            let link = SharedPtr::bind(tm.align(), tm.start())?;
            assert!(link.read(tx)?.is_null());

            let payload = link.alloc(tx, 32)?;
            assert_eq!(link.read(tx)?.as_ptr(), Some(payload));
            assert_eq!(link.alloc(tx, 32).unwrap_err(), TxFault::DoubleAlloc);

            link.free(tx)?;
            assert!(link.read(tx)?.is_null());
            assert_eq!(link.free(tx).unwrap_err(), TxFault::DoubleFree);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn fresh_alloc_reads_zero_through_accessors() {
        let tm = region(8, 8);
        transactional(&tm, TxMode::ReadWrite, |tx| {
            let link = SharedPtr::bind(tm.align(), tm.start())?;
            let payload = link.alloc(tx, 32)?;
            let words = SharedArray::<u64>::bind(tm.align(), payload)?;
            for i in 0..4 {
                assert_eq!(words.read(tx, i)?, 0);
            }
            link.free(tx)
        })
        .unwrap();
    }
}
