//! Master/worker phase synchronization.
//!
//! One [`PhaseSync`] drives all measurement phases of a run. The master
//! arms a phase with [`master_notify`](PhaseSync::master_notify) and blocks
//! in [`master_wait`](PhaseSync::master_wait); workers gather in
//! [`worker_wait`](PhaseSync::worker_wait) — the group is released only
//! when the last one arrives, to maximize interference — and report through
//! [`worker_notify`](PhaseSync::worker_notify), where the last one stops
//! the clock and wakes the master.
//!
//! Ordering contract: workers observe `Run` strictly after the last worker
//! incremented the ready counter (release store / acquire loads on
//! `status`); the master observes the outcome and the runtime strictly
//! after every worker finished (acq-rel counter increment in
//! `worker_notify`, then the latch hand-off).

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use fstm_error::{HarnessError, TxFault};

use crate::latch::Latch;
use crate::spin::short_pause;
use crate::stopwatch::Stopwatch;

/// Phase status, stored in an atomic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Status {
    /// Workers gathering; run as soon as all are ready.
    Wait = 0,
    /// Workers running, no failure so far.
    Run = 1,
    /// Workers running, at least one failure recorded.
    Abort = 2,
    /// Phase done, all workers succeeded.
    Done = 3,
    /// Phase done, at least one worker failed.
    Fail = 4,
    /// Workers must terminate.
    Quit = 5,
}

impl Status {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Wait,
            1 => Self::Run,
            2 => Self::Abort,
            3 => Self::Done,
            4 => Self::Fail,
            _ => Self::Quit,
        }
    }
}

/// The phase state machine shared by the master and all workers.
pub struct PhaseSync {
    nbworkers: u32,
    nbready: AtomicU32,
    status: AtomicU8,
    /// Any one of the failures reported this phase.
    error: Mutex<Option<HarnessError>>,
    /// Runtime between `master_notify` and the last worker finishing.
    runtime: Mutex<Stopwatch>,
    done: Latch,
}

impl PhaseSync {
    /// Phase machine for `nbworkers` workers.
    #[must_use]
    pub fn new(nbworkers: u32) -> Self {
        Self {
            nbworkers,
            nbready: AtomicU32::new(0),
            status: AtomicU8::new(Status::Done as u8),
            error: Mutex::new(None),
            runtime: Mutex::new(Stopwatch::new()),
            done: Latch::new(),
        }
    }

    fn status(&self, order: Ordering) -> Status {
        Status::from_raw(self.status.load(order))
    }

    /// Master: arm the next phase and start the clock.
    pub fn master_notify(&self) {
        self.runtime.lock().start();
        self.status.store(Status::Wait as u8, Ordering::Relaxed);
    }

    /// Master: wait for the phase to finish.
    ///
    /// Returns the phase runtime on success, the recorded worker error on
    /// failure, or [`HarnessError::PhaseOverrun`] if `deadline` elapsed
    /// first — in which case workers are still running and must not be
    /// joined.
    pub fn master_wait(&self, deadline: Option<Duration>) -> Result<Duration, HarnessError> {
        if !self.done.wait(deadline) {
            return Err(HarnessError::PhaseOverrun);
        }
        match self.status(Ordering::Relaxed) {
            Status::Done => Ok(self.runtime.lock().take()),
            Status::Fail => {
                let error = self.error.lock().take();
                Err(error.unwrap_or(HarnessError::Tx(TxFault::Unreachable(
                    "phase failed with no recorded error",
                ))))
            }
            _ => Err(HarnessError::Tx(TxFault::Unreachable(
                "master woke after raised latch, no timeout, but unexpected status",
            ))),
        }
    }

    /// Master: order all workers to terminate instead of arming a phase.
    pub fn master_join(&self) {
        self.status.store(Status::Quit as u8, Ordering::Relaxed);
    }

    /// Worker: gather for the next phase.
    ///
    /// Returns `false` when the master ordered termination. Otherwise
    /// blocks until every worker has arrived, so all workers start the
    /// phase as simultaneously as the scheduler allows.
    pub fn worker_wait(&self) -> bool {
        loop {
            match self.status(Ordering::Relaxed) {
                Status::Wait => break,
                Status::Quit => return false,
                _ => short_pause(),
            }
        }
        let ready = self.nbready.fetch_add(1, Ordering::Relaxed);
        if ready + 1 == self.nbworkers {
            // Last arriver: re-arm the counter and release the group.
            self.nbready.store(0, Ordering::Relaxed);
            self.status.store(Status::Run as u8, Ordering::Release);
        } else {
            loop {
                short_pause();
                // Pairs with the release above (and with a failing worker
                // publishing Abort).
                match self.status(Ordering::Acquire) {
                    Status::Run | Status::Abort => break,
                    _ => {}
                }
            }
        }
        true
    }

    /// Worker: report the end of this phase's work, with `error` carrying
    /// any failure.
    pub fn worker_notify(&self, error: Option<HarnessError>) {
        if let Some(error) = error {
            *self.error.lock() = Some(error);
            self.status.store(Status::Abort as u8, Ordering::Relaxed);
        }
        // Acq-rel: the last arriver must observe an Abort published by any
        // earlier worker, and the master must observe all worker effects.
        let ready = self.nbready.fetch_add(1, Ordering::AcqRel);
        if ready + 1 == self.nbworkers {
            self.nbready.store(0, Ordering::Relaxed);
            let outcome = if self.status(Ordering::Relaxed) == Status::Abort {
                Status::Fail
            } else {
                Status::Done
            };
            self.runtime.lock().stop();
            self.status.store(outcome as u8, Ordering::Relaxed);
            self.done.raise();
        }
    }
}

impl std::fmt::Debug for PhaseSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSync")
            .field("nbworkers", &self.nbworkers)
            .field("status", &self.status(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
