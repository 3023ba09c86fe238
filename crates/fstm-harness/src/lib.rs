//! Concurrent grading harness for FrankenSTM engines.
//!
//! The harness drives any [`fstm_core::TmLibrary`] implementation through a
//! bank workload engineered to expose concurrency bugs: worker threads are
//! released simultaneously from a purpose-built phase barrier, hammer the
//! shared region with long scans, allocation churn and short transfers,
//! and every phase runs against a deadline derived from the reference
//! engine's own timings.
//!
//! Layering, bottom up:
//!
//! - [`spin`], [`stopwatch`], [`latch`], [`bounded`] — small concurrency
//!   and timing utilities.
//! - [`sync`] — the master/worker phase machine.
//! - [`txn`] + [`shared`] — scoped transactions, the retry driver, and
//!   typed accessors over raw shared words.
//! - [`bank`] — the workload.
//! - [`measure`] + [`eval`] — the worker pool, median selection and
//!   deadline derivation.

pub mod bank;
pub mod bounded;
pub mod eval;
pub mod latch;
pub mod measure;
pub mod shared;
pub mod spin;
pub mod stopwatch;
pub mod sync;
pub mod txn;

pub use bank::BankWorkload;
pub use bounded::{MAX_SIDE_TIME, bounded_run};
pub use eval::{Evaluation, evaluate};
pub use latch::Latch;
pub use measure::{Deadlines, MeasureReport, Workload, measure};
pub use shared::{SharedArray, SharedPtr, SharedWord, TxWord};
pub use spin::{SpinBarrier, short_pause};
pub use stopwatch::{Stopwatch, median_duration};
pub use sync::PhaseSync;
pub use txn::{TmRegion, Transaction, TxMode, transactional};
