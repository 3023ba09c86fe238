//! Error types for FrankenSTM.
//!
//! Three layers, matching how faults propagate through the system:
//!
//! - [`TxFault`] — faults raised by the transaction wrapper around a single
//!   transaction. `Retry` is recovered inside the retry driver and never
//!   reaches a workload; everything else is fatal for the current phase.
//! - [`Violation`] — correctness violations detected by a workload. The
//!   messages are part of the grading contract and match the reference
//!   harness verbatim.
//! - [`HarnessError`] — everything the driver can surface: region setup
//!   failures, phase deadline overruns, worker panics, and the two layers
//!   above.

use thiserror::Error;

/// Fault raised by the transaction wrapper.
///
/// `Copy` so a fault can be stashed in the driver's shared error slot
/// without allocation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFault {
    /// The transaction aborted and can be retried. Consumed by the retry
    /// driver; seeing this outside `transactional` is a bug.
    #[error("transaction aborted and can be retried")]
    Retry,

    /// `begin` returned the invalid handle.
    #[error("transaction begin failed")]
    Begin,

    /// Transactional allocation failed for lack of memory.
    #[error("memory allocation failed (insufficient memory)")]
    OutOfMemory,

    /// Write, alloc or free attempted through a read-only transaction.
    #[error("tried to write/alloc/free using a read-only transaction")]
    ReadOnlyWrite,

    /// A shared address is not aligned for the accessed type or for the
    /// region word size.
    #[error("address {addr:#x} in shared memory is not aligned to {align}")]
    Misaligned { addr: usize, align: usize },

    /// Allocation through a pointer slot that is already non-null.
    #[error("(probable) double allocation detected before transactional operation")]
    DoubleAlloc,

    /// Free through a pointer slot that is already null.
    #[error("double free detected before transactional operation")]
    DoubleFree,

    /// Attempt to deallocate the first (non-deallocatable) segment.
    #[error("trying to deallocate the first segment")]
    FirstSegmentFree,

    /// Control reached a state the phase protocol rules out.
    #[error("unreachable: {0}")]
    Unreachable(&'static str),
}

/// Correctness violation detected by a workload.
///
/// Message texts are the grading contract; they are compared verbatim by
/// downstream tooling.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A long read-only scan observed a torn or non-serializable state.
    #[error("Violated isolation or atomicity")]
    IsolationOrAtomicity,

    /// A committed write was not visible to the next transaction.
    #[error(
        "Violated consistency (check that committed writes in shared memory \
         get visible to the following transactions' reads)"
    )]
    CommitVisibility,

    /// The shared counter check observed a lost or phantom update.
    #[error("Violated consistency")]
    Consistency,

    /// The counter stress observed a read-back above the prior read-only
    /// observation.
    #[error("Violated consistency, isolation or atomicity")]
    Full,
}

/// Any fault the driver can report for a library evaluation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessError {
    /// `tm_create` returned the invalid region.
    #[error("shared memory region creation failed")]
    RegionCreate,

    /// Region creation or destruction exceeded the side-operation budget.
    #[error("the transactional library takes too long {what}")]
    SideOverrun { what: &'static str },

    /// A measured phase exceeded its deadline.
    #[error("Transactional library takes too long to process the transactions")]
    PhaseOverrun,

    /// A worker thread panicked inside the workload.
    #[error("Internal worker exception(s)")]
    WorkerPanic,

    /// Transaction-level fault that escaped the retry driver.
    #[error(transparent)]
    Tx(#[from] TxFault),

    /// Workload-detected correctness violation.
    #[error(transparent)]
    Violation(#[from] Violation),
}

impl HarnessError {
    /// Process exit code for this failure.
    ///
    /// Correctness failures exit 1; overruns and worker panics exit 2 (the
    /// library may still hold locks, so the process must quit without
    /// waiting on it).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::PhaseOverrun | Self::SideOverrun { .. } | Self::WorkerPanic => 2,
            _ => 1,
        }
    }

    /// Whether the process must exit without joining worker threads.
    #[must_use]
    pub const fn is_overrun(&self) -> bool {
        matches!(self, Self::PhaseOverrun | Self::SideOverrun { .. })
    }
}

/// Result alias for transaction-level operations.
pub type TxResult<T> = std::result::Result<T, TxFault>;

/// Result alias for driver-level operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_match_the_contract() {
        assert_eq!(
            Violation::IsolationOrAtomicity.to_string(),
            "Violated isolation or atomicity"
        );
        assert_eq!(Violation::Consistency.to_string(), "Violated consistency");
        assert_eq!(
            Violation::Full.to_string(),
            "Violated consistency, isolation or atomicity"
        );
    }

    #[test]
    fn tx_fault_display() {
        let fault = TxFault::Misaligned { addr: 0x1003, align: 8 };
        assert_eq!(
            fault.to_string(),
            "address 0x1003 in shared memory is not aligned to 8"
        );
    }

    #[test]
    fn harness_error_from_layers() {
        let e: HarnessError = TxFault::OutOfMemory.into();
        assert!(matches!(e, HarnessError::Tx(TxFault::OutOfMemory)));
        let e: HarnessError = Violation::Consistency.into();
        assert!(matches!(e, HarnessError::Violation(_)));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(HarnessError::PhaseOverrun.exit_code(), 2);
        assert_eq!(
            HarnessError::SideOverrun { what: "creating the shared memory" }.exit_code(),
            2
        );
        assert_eq!(HarnessError::WorkerPanic.exit_code(), 2);
        assert_eq!(HarnessError::RegionCreate.exit_code(), 1);
        assert_eq!(
            HarnessError::from(Violation::Consistency).exit_code(),
            1
        );
    }

    #[test]
    fn overrun_classification() {
        assert!(HarnessError::PhaseOverrun.is_overrun());
        assert!(!HarnessError::WorkerPanic.is_overrun());
        assert!(!HarnessError::RegionCreate.is_overrun());
    }
}
