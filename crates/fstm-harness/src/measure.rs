//! Worker pool and phase measurement loop.
//!
//! One measurement drives `nbrepeats + 2` phases through the phase
//! machine: shared-state initialization, the measured runs, and the
//! correctness check. Workers execute exactly one workload call per phase;
//! the master collects per-phase runtimes and keeps the median of the
//! measured runs.
//!
//! A deadline overrun leaves workers unjoined on purpose: they may be
//! stuck inside the library under test, and the driver's contract is to
//! report and quit rather than hang with them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fstm_error::{HarnessError, TxFault};

use crate::stopwatch::median_duration;
use crate::sync::PhaseSync;

/// A workload the harness can measure.
///
/// `run` and `check` are called concurrently from every worker; `init` is
/// called from every worker too but its effects must be idempotent across
/// workers (the bank re-initializes the same shared state from each).
pub trait Workload: Send + Sync {
    /// Shared memory (re)initialization, with a cheap visibility check.
    fn init(&self) -> Result<(), HarnessError>;

    /// One worker's full measured run.
    fn run(&self, uid: usize, seed: u64) -> Result<(), HarnessError>;

    /// One worker's false-negative-free correctness check.
    fn check(&self, uid: usize, seed: u64) -> Result<(), HarnessError>;
}

/// Per-phase deadlines. `None` means unbounded (the reference library's
/// own evaluation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadlines {
    pub init: Option<Duration>,
    pub perf: Option<Duration>,
    pub check: Option<Duration>,
}

impl Deadlines {
    /// No deadline on any phase.
    pub const UNBOUNDED: Self = Self { init: None, perf: None, check: None };

    /// Deadlines for subsequent libraries, derived from a reference
    /// measurement scaled by `slow_factor`.
    #[must_use]
    pub fn from_reference(report: &MeasureReport, slow_factor: u32) -> Self {
        Self {
            init: Some(report.init * slow_factor),
            perf: Some(report.median * slow_factor),
            check: Some(report.check * slow_factor),
        }
    }
}

/// Phase runtimes of one successful measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureReport {
    /// Runtime of the initialization phase.
    pub init: Duration,
    /// Median runtime over the measured runs.
    pub median: Duration,
    /// Runtime of the correctness check phase.
    pub check: Duration,
}

/// Run one workload call, reporting its outcome to the phase machine.
///
/// Returns `false` when the call panicked: the worker thread must exit,
/// since its internal state can no longer be trusted.
fn notify_phase(
    sync: &PhaseSync,
    call: impl FnOnce() -> Result<(), HarnessError>,
) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(outcome) => {
            sync.worker_notify(outcome.err());
            true
        }
        Err(_) => {
            tracing::error!(target: "fstm.measure", "worker panicked inside the workload");
            sync.worker_notify(Some(HarnessError::WorkerPanic));
            false
        }
    }
}

/// Measure `workload` with `nbthreads` workers over `nbrepeats` runs.
///
/// Workers are released phase by phase from the same barrier so they
/// interfere as much as possible. Per-worker seeds are
/// `seed + nbthreads · round + uid`, giving every worker a disjoint
/// stream in every round; the check phase draws its seed from entropy on
/// purpose.
pub fn measure<W: Workload + 'static>(
    workload: Arc<W>,
    nbthreads: usize,
    nbrepeats: usize,
    seed: u64,
    deadlines: &Deadlines,
) -> Result<MeasureReport, HarnessError> {
    let sync = Arc::new(PhaseSync::new(nbthreads as u32));
    let mut handles = Vec::with_capacity(nbthreads);
    for uid in 0..nbthreads {
        let sync = Arc::clone(&sync);
        let workload = Arc::clone(&workload);
        handles.push(thread::spawn(move || {
            // Initialization.
            if !sync.worker_wait() {
                return;
            }
            if !notify_phase(&sync, || workload.init()) {
                return;
            }
            // Measured runs.
            for round in 0..nbrepeats {
                if !sync.worker_wait() {
                    return;
                }
                let run_seed = seed + (nbthreads * round + uid) as u64;
                if !notify_phase(&sync, || workload.run(uid, run_seed)) {
                    return;
                }
            }
            // Correctness check, seeded from entropy.
            if !sync.worker_wait() {
                return;
            }
            if !notify_phase(&sync, || workload.check(uid, rand::random())) {
                return;
            }
            // The protocol ends here; another release is a driver bug.
            if !sync.worker_wait() {
                return;
            }
            sync.worker_notify(Some(HarnessError::Tx(TxFault::Unreachable(
                "worker released after the check phase",
            ))));
        }));
    }

    let outcome = run_phases(&sync, nbrepeats, deadlines);
    match outcome {
        Err(error) if error.is_overrun() => {
            // Workers may be wedged inside the library; abandon them.
            tracing::error!(target: "fstm.measure", %error, "phase deadline overrun");
            drop(handles);
            Err(error)
        }
        _ => {
            sync.master_join();
            for handle in handles {
                if handle.join().is_err() {
                    return Err(HarnessError::WorkerPanic);
                }
            }
            outcome
        }
    }
}

fn run_phases(
    sync: &PhaseSync,
    nbrepeats: usize,
    deadlines: &Deadlines,
) -> Result<MeasureReport, HarnessError> {
    sync.master_notify();
    let init = sync.master_wait(deadlines.init)?;

    let mut times = Vec::with_capacity(nbrepeats);
    for _ in 0..nbrepeats {
        sync.master_notify();
        times.push(sync.master_wait(deadlines.perf)?);
    }
    let median = median_duration(&mut times);

    sync.master_notify();
    let check = sync.master_wait(deadlines.check)?;

    Ok(MeasureReport { init, median, check })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstm_error::Violation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWorkload {
        inits: AtomicUsize,
        runs: AtomicUsize,
        checks: AtomicUsize,
    }

    impl Workload for CountingWorkload {
        fn init(&self) -> Result<(), HarnessError> {
            self.inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn run(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn check(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            self.checks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn all_phases_visit_every_worker() {
        let workload = Arc::new(CountingWorkload::default());
        let _report = measure(Arc::clone(&workload), 4, 3, 1, &Deadlines::UNBOUNDED).unwrap();
        assert_eq!(workload.inits.load(Ordering::Relaxed), 4);
        assert_eq!(workload.runs.load(Ordering::Relaxed), 12);
        assert_eq!(workload.checks.load(Ordering::Relaxed), 4);
    }

    struct FailingWorkload;

    impl Workload for FailingWorkload {
        fn init(&self) -> Result<(), HarnessError> {
            Ok(())
        }
        fn run(&self, uid: usize, _seed: u64) -> Result<(), HarnessError> {
            if uid == 1 {
                return Err(Violation::IsolationOrAtomicity.into());
            }
            Ok(())
        }
        fn check(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    #[test]
    fn worker_failure_surfaces_and_joins() {
        let err = measure(Arc::new(FailingWorkload), 4, 3, 1, &Deadlines::UNBOUNDED).unwrap_err();
        assert_eq!(err, HarnessError::Violation(Violation::IsolationOrAtomicity));
    }

    struct PanickingWorkload;

    impl Workload for PanickingWorkload {
        fn init(&self) -> Result<(), HarnessError> {
            Ok(())
        }
        fn run(&self, uid: usize, _seed: u64) -> Result<(), HarnessError> {
            assert_ne!(uid, 0, "deliberate test panic");
            Ok(())
        }
        fn check(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    #[test]
    fn worker_panic_is_reported() {
        let err = measure(Arc::new(PanickingWorkload), 2, 2, 1, &Deadlines::UNBOUNDED).unwrap_err();
        assert_eq!(err, HarnessError::WorkerPanic);
    }

    struct SlowWorkload;

    impl Workload for SlowWorkload {
        fn init(&self) -> Result<(), HarnessError> {
            Ok(())
        }
        fn run(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }
        fn check(&self, _uid: usize, _seed: u64) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    #[test]
    fn deadline_overrun_surfaces_without_joining() {
        let deadlines = Deadlines {
            init: None,
            perf: Some(Duration::from_millis(20)),
            check: None,
        };
        let err = measure(Arc::new(SlowWorkload), 2, 1, 1, &deadlines).unwrap_err();
        assert_eq!(err, HarnessError::PhaseOverrun);
        // The abandoned workers finish their sleep and spin; give them a
        // moment so the test binary does not exit mid-notify.
        thread::sleep(Duration::from_millis(250));
    }

    #[test]
    fn reference_deadlines_scale_by_slow_factor() {
        let report = MeasureReport {
            init: Duration::from_millis(2),
            median: Duration::from_millis(10),
            check: Duration::from_millis(4),
        };
        let deadlines = Deadlines::from_reference(&report, 8);
        assert_eq!(deadlines.init, Some(Duration::from_millis(16)));
        assert_eq!(deadlines.perf, Some(Duration::from_millis(80)));
        assert_eq!(deadlines.check, Some(Duration::from_millis(32)));
    }
}
