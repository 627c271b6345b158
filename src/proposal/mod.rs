//! Proposal module - canonical per-proposal state
//!
//! Domain model, the shared store and the read model queried by the
//! presentation layer.

mod models;
mod read_model;
mod store;
mod text;

pub use models::*;
pub use read_model::{
    DevelopmentFilter, ProposalFilter, ProposalStats, ProposalSummary, ProposalView, MAX_PAGE,
};
pub use store::{
    IdentityEntry, IdentityIndex, Incident, ProposalSlot, ProposalStore, ReviewItem, ReviewKind,
    ReviewStatus, SourceSyncStatus, SyncRun, SyncRunStatus,
};
pub use text::fold_text;
