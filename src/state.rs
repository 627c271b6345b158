//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::db::ProposalRepository;
use crate::pipeline::SyncService;
use crate::proposal::ProposalStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Canonical proposal state (has internal locking)
    pub store: Arc<ProposalStore>,

    /// Source batch processing and manual review
    pub sync: SyncService,

    /// PostgreSQL persistence, if configured
    pub repository: Option<ProposalRepository>,
}

impl AppState {
    pub fn new(sync: SyncService, repository: Option<ProposalRepository>) -> Self {
        Self {
            store: sync.store().clone(),
            sync,
            repository,
        }
    }

    /// Storage backend name for the health endpoint
    pub fn storage(&self) -> &'static str {
        if self.repository.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
