//! Core types shared by the FrankenSTM engine and grading harness.
//!
//! Everything here is bit-compatible with the reference `tm_*` ABI: the
//! transaction sentinels, the allocation outcome codes, and the word-sized
//! address representation used for links stored inside a shared region.

use std::fmt;
use std::num::NonZeroUsize;

/// An opaque transaction identifier handed out by `begin` and consumed by
/// `end`.
///
/// The reference engine encodes the transaction mode in the handle itself;
/// pluggable engines are free to return anything except [`TxHandle::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TxHandle(usize);

impl TxHandle {
    /// Reserved invalid handle, returned when `begin` fails.
    pub const INVALID: Self = Self(usize::MAX);
    /// Sentinel for a read-only transaction in the reference engine.
    pub const READ_ONLY: Self = Self(usize::MAX - 10);
    /// Sentinel for a read-write transaction in the reference engine.
    pub const READ_WRITE: Self = Self(usize::MAX - 11);

    /// Build a handle from its raw representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw representation (what crosses the C ABI).
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> usize {
        self.0
    }

    /// Whether the handle denotes a live transaction.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Whether the reference engine issued this handle for a read-only
    /// transaction.
    #[inline]
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        self.0 == Self::READ_ONLY.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "tx:{:#x}", self.0)
        } else {
            f.write_str("tx:invalid")
        }
    }
}

/// Outcome of a transactional allocation, numerically identical to the
/// reference ABI (`success = 0`, `abort = 1`, `nomem = 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AllocOutcome {
    /// Allocation succeeded and the transaction can continue.
    Success = 0,
    /// The transaction was aborted and can be retried.
    Abort = 1,
    /// The allocator failed but the transaction was not aborted.
    NoMem = 2,
}

impl AllocOutcome {
    /// Decode the raw ABI value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Success),
            1 => Some(Self::Abort),
            2 => Some(Self::NoMem),
            _ => None,
        }
    }

    /// Raw ABI value.
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> i32 {
        self as i32
    }
}

/// A word-sized address *stored inside* a shared region.
///
/// Workloads persist inter-segment links in shared memory; those links are
/// plain words holding the payload address of the target segment, with zero
/// meaning "no segment". `Addr` is that representation, kept separate from
/// host pointers so that a link read out of the region cannot be
/// dereferenced without going back through a transactional accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Addr(usize);

impl Addr {
    /// The null link.
    pub const NULL: Self = Self(0);

    /// Address of a location in the current process.
    #[inline]
    #[must_use]
    pub fn from_ptr(ptr: *mut u8) -> Self {
        Self(ptr as usize)
    }

    /// Raw word value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this is the null link.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The host pointer this link denotes, `None` for null.
    #[inline]
    #[must_use]
    pub fn as_ptr(self) -> Option<*mut u8> {
        if self.is_null() { None } else { Some(self.0 as *mut u8) }
    }

    /// Link advanced by `bytes`.
    #[inline]
    #[must_use]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Account balance type. Signed so that a violation can drive a balance
/// negative and be caught; wide enough to hold a shared-memory link.
pub type Balance = i64;

const _: () = assert!(
    std::mem::size_of::<Balance>() >= std::mem::size_of::<usize>(),
    "Balance must be at least pointer-sized"
);

/// Fallback worker count when the hardware concurrency cannot be queried.
pub const FALLBACK_WORKERS: usize = 16;

/// Run parameters for one grading session, derived from the hardware
/// concurrency the way the reference driver derives them.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RunParams {
    /// Number of concurrent worker threads.
    pub nbworkers: usize,
    /// Transactions each worker issues per measured run.
    pub nbtxperwrk: usize,
    /// Initial number of accounts, and accounts per segment.
    pub nbaccounts: usize,
    /// Expected steady-state number of accounts (Gamma trigger shape).
    pub expnbaccounts: usize,
    /// Balance given to every fresh account.
    pub init_balance: Balance,
    /// Probability of running a long read-only scan.
    pub prob_long: f64,
    /// Probability of an alloc/dealloc transaction, given no long scan.
    pub prob_alloc: f64,
    /// Number of measured repetitions (median kept).
    pub nbrepeats: usize,
    /// Multiplier applied to the reference timings to derive deadlines.
    pub slow_factor: u32,
    /// Base seed for the per-worker PRNG streams.
    pub seed: u64,
}

impl RunParams {
    /// Derive the grading parameters for this machine.
    #[must_use]
    pub fn derive(seed: u64) -> Self {
        let nbworkers = std::thread::available_parallelism()
            .map_or(FALLBACK_WORKERS, NonZeroUsize::get);
        Self::for_workers(nbworkers, seed)
    }

    /// Parameters for an explicit worker count.
    #[must_use]
    pub fn for_workers(nbworkers: usize, seed: u64) -> Self {
        Self {
            nbworkers,
            nbtxperwrk: 200_000 / nbworkers,
            nbaccounts: 32 * nbworkers,
            expnbaccounts: 256 * nbworkers,
            init_balance: 100,
            prob_long: 0.5,
            prob_alloc: 0.01,
            nbrepeats: 7,
            slow_factor: 8,
            seed,
        }
    }

    /// Scaled-down parameters for tests. Keeps the probability mix and
    /// balance of the real run but with an explicit thread and volume
    /// budget.
    #[must_use]
    pub fn small(nbworkers: usize, nbtxperwrk: usize, nbaccounts: usize, seed: u64) -> Self {
        Self {
            nbworkers,
            nbtxperwrk,
            nbaccounts,
            expnbaccounts: 8 * nbaccounts,
            init_balance: 100,
            prob_long: 0.5,
            prob_alloc: 0.01,
            nbrepeats: 3,
            slow_factor: 8,
            seed,
        }
    }

    /// Seed for worker `uid` in measured round `round`, so that workers
    /// receive disjoint seed streams across rounds.
    #[inline]
    #[must_use]
    pub fn worker_seed(&self, round: usize, uid: usize) -> u64 {
        self.seed + (self.nbworkers * round + uid) as u64
    }
}
