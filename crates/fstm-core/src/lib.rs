//! Lock-based reference engine for FrankenSTM.
//!
//! A shared memory region is one initial segment plus any number of dynamic
//! segments, all protected by a single reader/writer lock held from `begin`
//! to `end`. Read-only transactions take the lock shared and run in
//! parallel; read-write transactions take it exclusive. Commit order equals
//! lock-acquisition order, which makes every execution strictly
//! serializable — the whole point of this engine is to be obviously
//! correct, not fast.
//!
//! The public surface is [`TmLibrary`], the Rust spelling of the eleven
//! `tm_*` ABI symbols, and [`ReferenceTm`], the engine implementing it.
//! The engine never aborts a transaction; the only failures it reports are
//! genuine allocator failures.

pub mod engine;
pub mod lock;
pub mod region;
pub mod seglist;

pub use engine::{INVALID_SHARED, ReferenceTm, SharedHandle, TmLibrary};
pub use lock::RegionLock;
pub use region::Region;
