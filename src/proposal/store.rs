//! Proposal storage
//!
//! In-memory canonical state, optionally mirrored to PostgreSQL by the sync
//! service. Every proposal lives in its own slot so reconciliation of one
//! proposal never blocks another; a slot holding `None` has an identity
//! reserved by the linker but nothing committed yet and is invisible to readers.

use crate::error::{AppError, SyncIssue};
use crate::models::sources::{SourceKind, SourceRecord};
use crate::proposal::ProposalRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type ProposalSlot = Arc<Mutex<Option<ProposalRecord>>>;

// =============================================================================
// IDENTITY INDEX
// =============================================================================

/// Linking view of one proposal
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityEntry {
    pub id: Uuid,
    pub registry_number: Option<String>,
    pub government_source_id: Option<String>,
    pub parliamentary_source_id: Option<String>,
    pub title: String,
    pub initiator: Option<String>,
}

impl IdentityEntry {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn source_id(&self, kind: SourceKind) -> Option<&str> {
        match kind {
            SourceKind::Government => self.government_source_id.as_deref(),
            SourceKind::Parliamentary => self.parliamentary_source_id.as_deref(),
        }
    }

    pub fn set_source_id(&mut self, kind: SourceKind, source_id: &str) {
        let slot = match kind {
            SourceKind::Government => &mut self.government_source_id,
            SourceKind::Parliamentary => &mut self.parliamentary_source_id,
        };
        *slot = Some(source_id.to_string());
    }

    fn from_record(record: &ProposalRecord) -> Self {
        let p = &record.proposal;
        Self {
            id: p.id,
            registry_number: p.registry_number.clone(),
            government_source_id: p.government_source_id.clone(),
            parliamentary_source_id: p.parliamentary_source_id.clone(),
            title: p.title.clone(),
            initiator: p.initiator.clone(),
        }
    }
}

/// Registry numbers and source ids mapped to internal proposal ids
#[derive(Debug, Default)]
pub struct IdentityIndex {
    entries: HashMap<Uuid, IdentityEntry>,
    by_registry: HashMap<String, Uuid>,
    by_government: HashMap<String, Uuid>,
    by_parliamentary: HashMap<String, Uuid>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&IdentityEntry> {
        self.entries.get(&id)
    }

    pub fn find_by_registry(&self, registry: &str) -> Option<Uuid> {
        self.by_registry.get(registry).copied()
    }

    pub fn find_by_source(&self, kind: SourceKind, source_id: &str) -> Option<Uuid> {
        match kind {
            SourceKind::Government => self.by_government.get(source_id).copied(),
            SourceKind::Parliamentary => self.by_parliamentary.get(source_id).copied(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &IdentityEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or replace an entry, keeping the lookup maps in step
    pub fn upsert(&mut self, entry: IdentityEntry) {
        if let Some(old) = self.entries.remove(&entry.id) {
            if let Some(r) = &old.registry_number {
                self.by_registry.remove(r);
            }
            if let Some(g) = &old.government_source_id {
                self.by_government.remove(g);
            }
            if let Some(p) = &old.parliamentary_source_id {
                self.by_parliamentary.remove(p);
            }
        }
        if let Some(r) = &entry.registry_number {
            self.by_registry.insert(r.clone(), entry.id);
        }
        if let Some(g) = &entry.government_source_id {
            self.by_government.insert(g.clone(), entry.id);
        }
        if let Some(p) = &entry.parliamentary_source_id {
            self.by_parliamentary.insert(p.clone(), entry.id);
        }
        self.entries.insert(entry.id, entry);
    }
}

// =============================================================================
// REVIEW QUEUE & INCIDENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// Registry missing; a proposal with a similar title was found
    TitleMatch,
    /// A registry reference was present but could not be parsed
    UnparseableRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Confirmed,
    Dismissed,
}

/// Item awaiting manual linking confirmation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: Uuid,
    pub kind: ReviewKind,
    pub status: ReviewStatus,
    pub source_kind: SourceKind,
    pub source_id: String,
    pub raw_registry_ref: Option<String>,
    pub candidate: Option<Uuid>,
    pub similarity: Option<f64>,
    #[serde(skip)]
    pub record: Option<SourceRecord>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_proposal: Option<Uuid>,
}

/// Operator-facing record of a collision, outage or failed write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub issue: SyncIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Completed,
    /// The source reported an error; whatever data it delivered was applied
    Failed,
    Cancelled,
}

impl SyncRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completed" => Some(SyncRunStatus::Completed),
            "failed" => Some(SyncRunStatus::Failed),
            "cancelled" => Some(SyncRunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Log entry for one finished sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub run_id: Uuid,
    pub source_kind: SourceKind,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub received: u32,
    pub linked: u32,
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
    pub developments: u32,
    pub issues: u32,
    pub error: Option<String>,
}

/// Most recent run and most recent completed run of one source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSyncStatus {
    pub source_kind: SourceKind,
    pub latest: Option<SyncRun>,
    pub last_completed: Option<SyncRun>,
}

// =============================================================================
// STORE
// =============================================================================

/// Thread-safe proposal store
pub struct ProposalStore {
    records: RwLock<HashMap<Uuid, ProposalSlot>>,
    identities: Mutex<IdentityIndex>,
    reviews: RwLock<Vec<ReviewItem>>,
    incidents: RwLock<Vec<Incident>>,
    runs: RwLock<Vec<SyncRun>>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            identities: Mutex::new(IdentityIndex::new()),
            reviews: RwLock::new(Vec::new()),
            incidents: RwLock::new(Vec::new()),
            runs: RwLock::new(Vec::new()),
        }
    }

    /// Load committed records, e.g. from the database at startup
    pub async fn hydrate(&self, loaded: Vec<ProposalRecord>) {
        let mut records = self.records.write().await;
        let mut index = self.identities.lock().await;
        for record in loaded {
            index.upsert(IdentityEntry::from_record(&record));
            records.insert(record.id(), Arc::new(Mutex::new(Some(record))));
        }
    }

    /// Exclusive access to the identity index (linking)
    pub async fn identities(&self) -> tokio::sync::MutexGuard<'_, IdentityIndex> {
        self.identities.lock().await
    }

    pub async fn identity(&self, id: Uuid) -> Option<IdentityEntry> {
        self.identities.lock().await.get(id).cloned()
    }

    /// Slot for a proposal, created empty if the id is new
    pub async fn slot(&self, id: Uuid) -> ProposalSlot {
        if let Some(slot) = self.records.read().await.get(&id) {
            return slot.clone();
        }
        self.records
            .write()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Committed state of one proposal
    pub async fn get(&self, id: Uuid) -> Result<ProposalRecord, AppError> {
        let slot = self.records.read().await.get(&id).cloned();
        let record = match slot {
            Some(slot) => slot.lock().await.clone(),
            None => None,
        };
        record.ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    /// Committed state of every proposal
    pub async fn all(&self) -> Vec<ProposalRecord> {
        let slots: Vec<ProposalSlot> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = slot.lock().await.clone() {
                out.push(record);
            }
        }
        out
    }

    /// Get proposal count
    pub async fn count(&self) -> usize {
        self.all().await.len()
    }

    // ---- review queue ----

    /// Queue an item, refreshing an existing pending one for the same source record
    pub async fn park_review(&self, mut item: ReviewItem) -> Uuid {
        let mut reviews = self.reviews.write().await;
        if let Some(existing) = reviews.iter_mut().find(|r| {
            r.status == ReviewStatus::Pending
                && r.kind == item.kind
                && r.source_kind == item.source_kind
                && r.source_id == item.source_id
        }) {
            existing.candidate = item.candidate;
            existing.similarity = item.similarity;
            existing.raw_registry_ref = item.raw_registry_ref.take();
            existing.record = item.record.take();
            return existing.id;
        }
        let id = item.id;
        reviews.push(item);
        id
    }

    pub async fn pending_reviews(&self) -> Vec<ReviewItem> {
        self.reviews
            .read()
            .await
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .cloned()
            .collect()
    }

    pub async fn review(&self, id: Uuid) -> Result<ReviewItem, AppError> {
        self.reviews
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Review item {} not found", id)))
    }

    pub async fn resolve_review(
        &self,
        id: Uuid,
        status: ReviewStatus,
        proposal: Option<Uuid>,
    ) -> Result<ReviewItem, AppError> {
        let mut reviews = self.reviews.write().await;
        let item = reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Review item {} not found", id)))?;
        if item.status != ReviewStatus::Pending {
            return Err(AppError::Conflict(format!("Review item {} is already resolved", id)));
        }
        item.status = status;
        item.resolved_at = Some(Utc::now());
        item.resolved_proposal = proposal;
        Ok(item.clone())
    }

    // ---- incidents ----

    pub async fn record_incident(&self, run_id: Uuid, issue: SyncIssue) {
        self.incidents.write().await.push(Incident {
            id: Uuid::new_v4(),
            run_id,
            recorded_at: Utc::now(),
            issue,
        });
    }

    /// Incidents, newest first
    pub async fn incidents(&self) -> Vec<Incident> {
        let mut out = self.incidents.read().await.clone();
        out.reverse();
        out
    }
}

impl ProposalStore {
    // ---- sync run log ----

    pub async fn hydrate_runs(&self, mut loaded: Vec<SyncRun>) {
        loaded.sort_by_key(|r| r.finished_at);
        *self.runs.write().await = loaded;
    }

    pub async fn record_run(&self, run: SyncRun) {
        self.runs.write().await.push(run);
    }

    /// Latest and latest completed run per source
    pub async fn sync_status(&self) -> Vec<SourceSyncStatus> {
        let runs = self.runs.read().await;
        [SourceKind::Government, SourceKind::Parliamentary]
            .into_iter()
            .map(|kind| {
                let mut of_kind = runs.iter().rev().filter(|r| r.source_kind == kind);
                SourceSyncStatus {
                    source_kind: kind,
                    latest: of_kind.clone().next().cloned(),
                    last_completed: of_kind
                        .find(|r| r.status == SyncRunStatus::Completed)
                        .cloned(),
                }
            })
            .collect()
    }
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(registry: &str, gov: &str) -> IdentityEntry {
        IdentityEntry {
            id: Uuid::new_v4(),
            registry_number: Some(registry.to_string()),
            government_source_id: Some(gov.to_string()),
            parliamentary_source_id: None,
            title: "Projekt ustawy o zdrowiu".to_string(),
            initiator: None,
        }
    }

    #[test]
    fn test_identity_index_reindexes_on_upsert() {
        let mut index = IdentityIndex::new();
        let mut e = entry("RM-0610-136-25", "12345");
        let id = e.id;
        index.upsert(e.clone());
        assert_eq!(index.find_by_registry("RM-0610-136-25"), Some(id));

        e.parliamentary_source_id = Some("10/1604".to_string());
        index.upsert(e);
        assert_eq!(index.find_by_source(SourceKind::Parliamentary, "10/1604"), Some(id));
        assert_eq!(index.find_by_source(SourceKind::Government, "12345"), Some(id));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_slot_is_invisible() {
        let store = ProposalStore::new();
        let id = Uuid::new_v4();
        let _slot = store.slot(id).await;
        assert!(store.get(id).await.is_err());
        assert_eq!(store.count().await, 0);

        store.hydrate(vec![ProposalRecord::new(id, Utc::now())]).await;
        assert!(store.get(id).await.is_ok());
    }

    fn run(kind: SourceKind, status: SyncRunStatus, minutes: i64) -> SyncRun {
        let at = Utc::now() + chrono::Duration::minutes(minutes);
        SyncRun {
            run_id: Uuid::new_v4(),
            source_kind: kind,
            status,
            started_at: at,
            finished_at: at,
            received: 3,
            linked: 1,
            created: 2,
            updated: 3,
            failed: 0,
            developments: 1,
            issues: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_sync_status_keeps_last_completed_run_per_source() {
        let store = ProposalStore::new();
        let completed = run(SourceKind::Parliamentary, SyncRunStatus::Completed, 0);
        let failed = run(SourceKind::Parliamentary, SyncRunStatus::Failed, 5);
        store
            .hydrate_runs(vec![failed.clone(), completed.clone()])
            .await;
        let government = run(SourceKind::Government, SyncRunStatus::Completed, 7);
        store.record_run(government.clone()).await;

        let status = store.sync_status().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].latest.as_ref(), Some(&government));
        assert_eq!(status[1].source_kind, SourceKind::Parliamentary);
        assert_eq!(status[1].latest.as_ref(), Some(&failed));
        assert_eq!(status[1].last_completed.as_ref(), Some(&completed));
    }

    #[tokio::test]
    async fn test_park_review_deduplicates_pending_items() {
        let store = ProposalStore::new();
        let make = || ReviewItem {
            id: Uuid::new_v4(),
            kind: ReviewKind::TitleMatch,
            status: ReviewStatus::Pending,
            source_kind: SourceKind::Parliamentary,
            source_id: "10/77".to_string(),
            raw_registry_ref: None,
            candidate: Some(Uuid::nil()),
            similarity: Some(0.93),
            record: None,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_proposal: None,
        };
        let first = store.park_review(make()).await;
        let second = store.park_review(make()).await;
        assert_eq!(first, second);
        assert_eq!(store.pending_reviews().await.len(), 1);

        store.resolve_review(first, ReviewStatus::Dismissed, None).await.unwrap();
        assert!(store.pending_reviews().await.is_empty());
        assert!(store.resolve_review(first, ReviewStatus::Confirmed, None).await.is_err());
    }
}
