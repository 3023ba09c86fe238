//! Per-library evaluation: workload construction, measurement, and the
//! user-facing figures.

use std::sync::Arc;

use fstm_core::TmLibrary;
use fstm_error::HarnessError;
use fstm_types::RunParams;

use crate::bank::BankWorkload;
use crate::measure::{Deadlines, MeasureReport, measure};

/// Outcome of evaluating one library.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    /// Raw phase runtimes.
    pub report: MeasureReport,
    /// Total user execution time of the median run, in milliseconds.
    pub total_ms: f64,
    /// Average per-transaction execution time, in nanoseconds.
    pub avg_tx_ns: f64,
    /// Deadlines for libraries evaluated after this one.
    pub next_deadlines: Deadlines,
}

/// Evaluate `lib` under `params`.
///
/// The shared region lives exactly as long as the evaluation: it is
/// created with the workload and destroyed when the workload is dropped on
/// the way out. The returned deadlines are this library's timings scaled
/// by the slow factor — pass them to the next library's evaluation, or
/// [`Deadlines::UNBOUNDED`] when this *is* the reference run.
pub fn evaluate<L: TmLibrary>(
    lib: Arc<L>,
    params: &RunParams,
    deadlines: &Deadlines,
) -> Result<Evaluation, HarnessError> {
    tracing::info!(
        target: "fstm.measure",
        nbworkers = params.nbworkers,
        nbtxperwrk = params.nbtxperwrk,
        nbaccounts = params.nbaccounts,
        "evaluating library"
    );
    let bank = BankWorkload::new(lib, *params)?;
    let report = measure(
        Arc::new(bank),
        params.nbworkers,
        params.nbrepeats,
        params.seed,
        deadlines,
    )?;

    let perf_ns = report.median.as_nanos() as f64;
    let per_tx_div = (params.nbworkers * params.nbtxperwrk) as f64;
    Ok(Evaluation {
        report,
        total_ms: perf_ns / 1_000_000.0,
        avg_tx_ns: perf_ns / per_tx_div,
        next_deadlines: Deadlines::from_reference(&report, params.slow_factor),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstm_core::ReferenceTm;

    #[test]
    fn reference_evaluation_succeeds_and_derives_deadlines() {
        let params = RunParams::small(2, 200, 8, 42);
        let eval = evaluate(Arc::new(ReferenceTm), &params, &Deadlines::UNBOUNDED).unwrap();
        assert!(eval.total_ms >= 0.0);
        assert!(eval.avg_tx_ns >= 0.0);
        let perf = eval.next_deadlines.perf.unwrap();
        assert_eq!(perf, eval.report.median * params.slow_factor);
    }

    #[test]
    fn evaluation_under_slack_deadlines_still_passes() {
        use std::time::Duration;
        let params = RunParams::small(2, 200, 8, 42);
        // Deadlines generous enough to never fire on a healthy machine;
        // this exercises the bounded master_wait path end to end.
        let slack = Duration::from_secs(30);
        let deadlines =
            Deadlines { init: Some(slack), perf: Some(slack), check: Some(slack) };
        let eval = evaluate(Arc::new(ReferenceTm), &params, &deadlines).unwrap();
        assert!(eval.total_ms >= 0.0);
    }
}
