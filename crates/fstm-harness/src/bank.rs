//! The bank workload: a chain of account segments designed to expose
//! isolation, atomicity and consistency bugs in an engine.
//!
//! The shared region holds a linked chain of segments, each laid out as
//! consecutive aligned words:
//!
//! ```text
//! count     : word  -- live accounts in this segment
//! next      : word  -- link to the next segment (null for the last)
//! parity    : word  -- balance correction accumulated by deletions
//! accounts[]: words -- one balance per account (count of them live)
//! ```
//!
//! The chain-wide invariant checked by the long scan: the parities plus
//! the live balances sum to `init_balance × live accounts`, and no balance
//! is ever negative. Deleting an account folds its balance error into the
//! segment parity, so the scan stays O(segments + accounts) under churn.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma};

use fstm_core::TmLibrary;
use fstm_error::{HarnessError, TxFault, TxResult, Violation};
use fstm_types::{Addr, Balance, RunParams};

use crate::measure::Workload;
use crate::shared::{SharedArray, SharedPtr, SharedWord};
use crate::spin::SpinBarrier;
use crate::txn::{TmRegion, TxMode, transactional};

/// Transactions per worker during the `check` phase.
const CHECK_TX_PER_WORKER: usize = 100;

/// Layout marker for one account segment header; the balances array
/// follows it.
#[repr(C)]
struct SegmentLayout {
    count: usize,
    next: usize,
    parity: Balance,
}

/// Byte size of a segment holding `nbaccounts` balances.
#[must_use]
pub const fn segment_size(nbaccounts: usize) -> usize {
    std::mem::size_of::<SegmentLayout>() + nbaccounts * std::mem::size_of::<Balance>()
}

/// Word alignment of a segment.
#[must_use]
pub const fn segment_align() -> usize {
    std::mem::align_of::<SegmentLayout>()
}

/// Per-transaction view of one account segment.
struct Segment {
    count: SharedWord<usize>,
    next: SharedPtr,
    parity: SharedWord<Balance>,
    accounts: SharedArray<Balance>,
}

impl Segment {
    fn bind(region_align: usize, base: *mut u8) -> TxResult<Self> {
        let count = SharedWord::bind(region_align, base)?;
        let next = SharedPtr::bind(region_align, count.after())?;
        let parity = SharedWord::bind(region_align, next.after())?;
        let accounts = SharedArray::bind(region_align, parity.after())?;
        Ok(Self { count, next, parity, accounts })
    }
}

/// The bank workload over one shared region.
pub struct BankWorkload<L: TmLibrary> {
    tm: TmRegion<L>,
    params: RunParams,
    barrier: SpinBarrier,
}

impl<L: TmLibrary> BankWorkload<L> {
    /// Build the workload: one region sized for a full first segment.
    pub fn new(lib: Arc<L>, params: RunParams) -> Result<Self, HarnessError> {
        let tm = TmRegion::create(lib, segment_align(), segment_size(params.nbaccounts))?;
        let barrier = SpinBarrier::new(params.nbworkers as u32);
        Ok(Self { tm, params, barrier })
    }

    /// The run parameters this workload was built with.
    #[must_use]
    pub const fn params(&self) -> &RunParams {
        &self.params
    }

    fn word(&self) -> usize {
        self.tm.align()
    }

    /// Long read-only scan of the whole chain.
    ///
    /// Returns whether the chain is consistent: no negative balance, and
    /// parities plus balances summing to `init_balance × live accounts`.
    /// `nbaccounts` receives the observed live-account count, which later
    /// transfers use as a loose index bound.
    pub fn long_tx(&self, nbaccounts: &mut usize) -> TxResult<bool> {
        let init_balance = self.params.init_balance;
        transactional(&self.tm, TxMode::ReadOnly, |tx| {
            let mut count = 0usize;
            let mut sum: Balance = 0;
            let mut start = Addr::from_ptr(self.tm.start());
            while let Some(base) = start.as_ptr() {
                let segment = Segment::bind(self.word(), base)?;
                let segment_count = segment.count.read(tx)?;
                count += segment_count;
                sum += segment.parity.read(tx)?;
                for i in 0..segment_count {
                    let local = segment.accounts.read(tx, i)?;
                    if local < 0 {
                        return Ok(false);
                    }
                    sum += local;
                }
                start = segment.next.read(tx)?;
            }
            *nbaccounts = count;
            Ok(sum == init_balance * count as Balance)
        })
    }

    /// Account (de)allocation: walk to the last segment, then deallocate
    /// the newest account when the population exceeds `trigger`, or
    /// allocate a fresh one (growing the chain when the last segment is
    /// full).
    pub fn alloc_tx(&self, trigger: usize) -> TxResult<()> {
        let nbaccounts = self.params.nbaccounts;
        let init_balance = self.params.init_balance;
        transactional(&self.tm, TxMode::ReadWrite, |tx| {
            let mut count = 0usize;
            let mut prev: Option<Segment> = None;
            let mut start = Addr::from_ptr(self.tm.start());
            loop {
                let Some(base) = start.as_ptr() else {
                    return Err(TxFault::Unreachable("account chain lost its head"));
                };
                let segment = Segment::bind(self.word(), base)?;
                let mut segment_count = segment.count.read(tx)?;
                count += segment_count;
                let segment_next = segment.next.read(tx)?;

                if segment_next.is_null() {
                    if count > trigger && count > 2 {
                        // Deallocate the newest account.
                        segment_count -= 1;
                        let removed = segment.accounts.read(tx, segment_count)?;
                        let new_parity = segment.parity.read(tx)? + removed - init_balance;
                        if segment_count > 0 {
                            segment.count.write(tx, segment_count)?;
                            segment.parity.write(tx, new_parity)?;
                        } else {
                            // Segment emptied: fold its parity into the
                            // predecessor and unlink it. The first segment
                            // has no predecessor and must never be freed.
                            let Some(prev) = prev.as_ref() else {
                                return Err(TxFault::FirstSegmentFree);
                            };
                            prev.next.free(tx)?;
                            let folded = prev.parity.read(tx)? + new_parity;
                            prev.parity.write(tx, folded)?;
                        }
                    } else if segment_count < nbaccounts {
                        // Room left in the last segment.
                        segment.accounts.write(tx, segment_count, init_balance)?;
                        segment.count.write(tx, segment_count + 1)?;
                    } else {
                        // Grow the chain by one segment.
                        let payload = segment.next.alloc(tx, segment_size(nbaccounts))?;
                        let fresh = Segment::bind(self.word(), payload)?;
                        fresh.count.write(tx, 1)?;
                        fresh.accounts.write(tx, 0, init_balance)?;
                    }
                    return Ok(());
                }
                prev = Some(segment);
                start = segment_next;
            }
        })
    }

    /// Short transfer of one unit from account `send_id` to account
    /// `recv_id` (global indices over the chain).
    ///
    /// Returns `Ok(false)` — no work done — when either index is past the
    /// current population; the caller draws fresh indices and retries.
    pub fn short_tx(&self, send_id: usize, recv_id: usize) -> TxResult<bool> {
        transactional(&self.tm, TxMode::ReadWrite, |tx| {
            let mut send_id = send_id;
            let mut recv_id = recv_id;
            let mut send_ptr: Option<*mut u8> = None;
            let mut recv_ptr: Option<*mut u8> = None;

            // Translate the global indices by walking the chain.
            let mut start = Addr::from_ptr(self.tm.start());
            loop {
                let Some(base) = start.as_ptr() else {
                    return Err(TxFault::Unreachable("account chain lost its head"));
                };
                let segment = Segment::bind(self.word(), base)?;
                let segment_count = segment.count.read(tx)?;
                if send_ptr.is_none() {
                    if send_id < segment_count {
                        send_ptr = Some(segment.accounts.slot_addr(send_id));
                        if recv_ptr.is_some() {
                            break;
                        }
                    } else {
                        send_id -= segment_count;
                    }
                }
                if recv_ptr.is_none() {
                    if recv_id < segment_count {
                        recv_ptr = Some(segment.accounts.slot_addr(recv_id));
                        if send_ptr.is_some() {
                            break;
                        }
                    } else {
                        recv_id -= segment_count;
                    }
                }
                start = segment.next.read(tx)?;
                if start.is_null() {
                    // At least one account does not exist: do nothing.
                    return Ok(false);
                }
            }

            let (Some(send_ptr), Some(recv_ptr)) = (send_ptr, recv_ptr) else {
                return Err(TxFault::Unreachable("transfer endpoints without addresses"));
            };
            let sender = SharedWord::<Balance>::bind(self.word(), send_ptr)?;
            let recver = SharedWord::<Balance>::bind(self.word(), recv_ptr)?;
            let send_val = sender.read(tx)?;
            if send_val > 0 {
                sender.write(tx, send_val - 1)?;
                let recv_val = recver.read(tx)?;
                recver.write(tx, recv_val + 1)?;
            }
            Ok(true)
        })
    }

    fn counter(&self) -> TxResult<SharedWord<usize>> {
        SharedWord::bind(self.word(), self.tm.start())
    }
}

impl<L: TmLibrary> Workload for BankWorkload<L> {
    fn init(&self) -> Result<(), HarnessError> {
        let nbaccounts = self.params.nbaccounts;
        let init_balance = self.params.init_balance;
        transactional(&self.tm, TxMode::ReadWrite, |tx| {
            let segment = Segment::bind(self.word(), self.tm.start())?;
            segment.count.write(tx, nbaccounts)?;
            for i in 0..nbaccounts {
                segment.accounts.write(tx, i, init_balance)?;
            }
            Ok(())
        })?;
        // Committed writes must be visible to the next transaction.
        let correct = transactional(&self.tm, TxMode::ReadOnly, |tx| {
            let segment = Segment::bind(self.word(), self.tm.start())?;
            Ok(segment.accounts.read(tx, 0)? == init_balance)
        })?;
        if !correct {
            return Err(Violation::CommitVisibility.into());
        }
        Ok(())
    }

    fn run(&self, _uid: usize, seed: u64) -> Result<(), HarnessError> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let alloc_trigger = Gamma::new(self.params.expnbaccounts as f64, 1.0)
            .map_err(|_| HarnessError::Tx(TxFault::Unreachable("gamma trigger parameters")))?;

        let mut count = self.params.nbaccounts;
        for _ in 0..self.params.nbtxperwrk {
            if rng.random_bool(self.params.prob_long) {
                if !self.long_tx(&mut count)? {
                    return Err(Violation::IsolationOrAtomicity.into());
                }
            } else if rng.random_bool(self.params.prob_alloc) {
                self.alloc_tx(alloc_trigger.sample(&mut rng) as usize)?;
            } else {
                loop {
                    let send_id = rng.random_range(0..count);
                    let recv_id = rng.random_range(0..count);
                    if self.short_tx(send_id, recv_id)? {
                        break;
                    }
                }
            }
        }
        // Closing scan: the chain must still be consistent.
        let mut ignored = 0;
        if !self.long_tx(&mut ignored)? {
            return Err(Violation::IsolationOrAtomicity.into());
        }
        Ok(())
    }

    fn check(&self, uid: usize, _seed: u64) -> Result<(), HarnessError> {
        self.barrier.sync();
        if uid == 0 {
            let init_counter = CHECK_TX_PER_WORKER * self.params.nbworkers;
            transactional(&self.tm, TxMode::ReadWrite, |tx| {
                self.counter()?.write(tx, init_counter)
            })?;
            let correct = transactional(&self.tm, TxMode::ReadOnly, |tx| {
                Ok(self.counter()?.read(tx)? == init_counter)
            })?;
            if !correct {
                // Keep the barrier counts matched for the other workers.
                self.barrier.sync();
                self.barrier.sync();
                return Err(Violation::Consistency.into());
            }
        }
        self.barrier.sync();
        for _ in 0..CHECK_TX_PER_WORKER {
            let last = transactional(&self.tm, TxMode::ReadOnly, |tx| self.counter()?.read(tx))?;
            let correct = transactional(&self.tm, TxMode::ReadWrite, |tx| {
                let counter = self.counter()?;
                let value = counter.read(tx)?;
                if value > last {
                    return Ok(false);
                }
                counter.write(tx, value.wrapping_sub(1))?;
                Ok(true)
            })?;
            if !correct {
                self.barrier.sync();
                return Err(Violation::Full.into());
            }
        }
        self.barrier.sync();
        if uid == 0 {
            let correct = transactional(&self.tm, TxMode::ReadOnly, |tx| {
                Ok(self.counter()?.read(tx)? == 0)
            })?;
            if !correct {
                return Err(Violation::Consistency.into());
            }
        }
        Ok(())
    }
}

impl<L: TmLibrary> std::fmt::Debug for BankWorkload<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BankWorkload")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
