//! Bounded-time execution for library calls outside any retry loop.
//!
//! Region creation and destruction run outside the transaction machinery,
//! so a misbehaving library can hang them indefinitely. The bounded runner
//! executes such calls on a throwaway thread and abandons the thread on
//! overrun — the library may be stuck holding locks, so joining it could
//! hang the driver too.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use fstm_error::HarnessError;

/// Budget for region creation and destruction.
pub const MAX_SIDE_TIME: Duration = Duration::from_millis(2000);

/// Run `f` on a fresh thread, waiting at most `limit` for its result.
///
/// On overrun the runner thread is detached and
/// [`HarnessError::SideOverrun`] is returned with `what` naming the
/// operation. If `f` panics the failure surfaces as
/// [`HarnessError::WorkerPanic`].
pub fn bounded_run<R, F>(limit: Duration, what: &'static str, f: F) -> Result<R, HarnessError>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(1);
    let runner = thread::spawn(move || {
        let _ = sender.send(f());
    });
    match receiver.recv_timeout(limit) {
        Ok(result) => {
            let _ = runner.join();
            Ok(result)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::error!(target: "fstm.measure", what, "side operation overran its budget");
            drop(runner); // detach
            Err(HarnessError::SideOverrun { what })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            let _ = runner.join();
            Err(HarnessError::WorkerPanic)
        }
    }
}
