//! Reconciliation Pipeline
//!
//! Turns source batches into canonical proposal state:
//!
//! 1. **Linker**: assign each record to a stable proposal identity
//! 2. **Reconciler**: merge stages and sub-records without loss or duplication
//! 3. **Voting**: keep the single current voting in step with the latest tally
//! 4. **Phase**: derive the lifecycle phase from the merged state
//! 5. **Developments**: log every phase transition exactly once
//!
//! [`SyncService`] drives all five for one run.

pub mod developments;
pub mod linker;
pub mod phase;
pub mod reconciler;
pub mod sync;
pub mod voting;

pub use sync::{ReviewResolution, SyncReport, SyncService};
