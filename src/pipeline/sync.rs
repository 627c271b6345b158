//! Sync Service
//!
//! Runs one source batch end to end: envelope validation, linking, then
//! per-proposal reconciliation with phase derivation and the development log.
//! Proposals are reconciled in parallel, each inside its own slot lock; a
//! cancelled run stops picking up proposals but always finishes the one it
//! is working on.

use crate::config::SyncConfig;
use crate::db::ProposalRepository;
use crate::error::{not_found_error, AppError, SyncIssue};
use crate::models::sources::{
    GovernmentRecord, Lenient, ParliamentaryRecord, SourceKind, SourceRecord, SyncBatch,
};
use crate::pipeline::developments;
use crate::pipeline::linker::{LinkOutcome, Linker, SourceClaim};
use crate::pipeline::phase::{self, PhaseMove};
use crate::pipeline::reconciler;
use crate::pipeline::voting;
use crate::proposal::{
    IdentityEntry, Origin, Phase, Proposal, ProposalRecord, ProposalStore, ProposalView,
    ReviewItem, ReviewKind, ReviewStatus, SyncRun, SyncRunStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

// =============================================================================
// REPORTS
// =============================================================================

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source_kind: SourceKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub received: usize,
    /// Records attached to an existing proposal
    pub linked: usize,
    /// Records that created a new proposal
    pub created: usize,
    /// Records held back for manual link confirmation
    pub parked: usize,
    /// Records dropped before reconciliation (invalid envelope or collision)
    pub skipped_records: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub developments: usize,
    pub cancelled: bool,
    pub skipped_proposals: usize,
    pub issues: Vec<SyncIssue>,
}

impl SyncReport {
    fn new(run_id: Uuid, source_kind: SourceKind, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            source_kind,
            started_at,
            finished_at: started_at,
            received: 0,
            linked: 0,
            created: 0,
            parked: 0,
            skipped_records: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            developments: 0,
            cancelled: false,
            skipped_proposals: 0,
            issues: Vec::new(),
        }
    }

    fn absorb(&mut self, outcome: ProposalOutcome) {
        match outcome.status {
            OutcomeStatus::Updated => self.updated += 1,
            OutcomeStatus::Unchanged => self.unchanged += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped_proposals += 1,
        }
        self.developments += outcome.developments;
        self.issues.extend(outcome.issues);
    }
}

/// Result of confirming or dismissing a review item
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResolution {
    pub review: ReviewItem,
    pub issues: Vec<SyncIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OutcomeStatus {
    Updated,
    #[default]
    Unchanged,
    Failed,
    Skipped,
}

#[derive(Debug, Default)]
struct ProposalOutcome {
    status: OutcomeStatus,
    developments: usize,
    issues: Vec<SyncIssue>,
}

impl ProposalOutcome {
    fn skipped() -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            ..Self::default()
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Entry point for source batches and manual review decisions
#[derive(Clone)]
pub struct SyncService {
    store: Arc<ProposalStore>,
    repository: Option<ProposalRepository>,
    linker: Arc<Linker>,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        store: Arc<ProposalStore>,
        repository: Option<ProposalRepository>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        let linker = Linker::new(&config.registry_prefix, config.title_threshold)
            .map_err(|e| AppError::Config(format!("Invalid registry prefix: {}", e)))?;
        Ok(Self {
            store,
            repository,
            linker: Arc::new(linker),
            max_parallel: config.max_parallel.max(1),
            cancel,
        })
    }

    pub fn store(&self) -> &Arc<ProposalStore> {
        &self.store
    }

    pub async fn run_government(&self, batch: SyncBatch<GovernmentRecord>) -> SyncReport {
        let SyncBatch {
            run_id,
            source_error,
            records,
        } = batch;
        let records = records
            .into_iter()
            .map(|r| r.map(SourceRecord::Government))
            .collect();
        self.run(SourceKind::Government, run_id, source_error, records)
            .await
    }

    pub async fn run_parliamentary(&self, batch: SyncBatch<ParliamentaryRecord>) -> SyncReport {
        let SyncBatch {
            run_id,
            source_error,
            records,
        } = batch;
        let records = records
            .into_iter()
            .map(|r| r.map(SourceRecord::Parliamentary))
            .collect();
        self.run(SourceKind::Parliamentary, run_id, source_error, records)
            .await
    }

    async fn run(
        &self,
        source_kind: SourceKind,
        run_id: Option<Uuid>,
        source_error: Option<String>,
        records: Vec<Lenient<SourceRecord>>,
    ) -> SyncReport {
        let run_id = run_id.unwrap_or_else(Uuid::new_v4);
        let span = info_span!("sync_run", source = %source_kind, run_id = %run_id);
        self.execute(source_kind, run_id, source_error, records)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        source_kind: SourceKind,
        run_id: Uuid,
        source_error: Option<String>,
        records: Vec<Lenient<SourceRecord>>,
    ) -> SyncReport {
        let observed_at = Utc::now();
        let mut report = SyncReport::new(run_id, source_kind, observed_at);
        report.received = records.len();
        info!("Sync run started with {} records", records.len());

        if let Some(reason) = &source_error {
            report.issues.push(SyncIssue::SourceUnavailable {
                source_kind,
                reason: reason.clone(),
            });
        }

        let groups = self
            .link_all(source_kind, records, observed_at, &mut report)
            .await;

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        for (id, records) in groups {
            let store = self.store.clone();
            let repository = self.repository.clone();
            let cancel = self.cancel.clone();
            let semaphore = semaphore.clone();
            let task = async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ProposalOutcome::skipped();
                };
                if cancel.is_cancelled() {
                    return ProposalOutcome::skipped();
                }
                reconcile_proposal(&store, repository.as_ref(), id, &records, observed_at).await
            };
            tasks.spawn(task.instrument(Span::current()));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    error!("Reconciliation task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.cancelled = report.skipped_proposals > 0;
        self.publish_issues(run_id, &report.issues).await;
        report.finished_at = Utc::now();
        self.log_run(&report, source_error).await;

        info!(
            "Sync run finished: {} updated, {} unchanged, {} created, {} parked, {} developments, {} issues{}",
            report.updated,
            report.unchanged,
            report.created,
            report.parked,
            report.developments,
            report.issues.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    async fn log_run(&self, report: &SyncReport, source_error: Option<String>) {
        let run = run_entry(report, source_error);
        if let Some(repository) = &self.repository {
            if let Err(e) = repository.save_run(&run).await {
                error!("Failed to log sync run {}: {}", run.run_id, e);
            }
        }
        self.store.record_run(run).await;
    }

    /// Link every record, grouping the reconcilable ones by proposal
    async fn link_all(
        &self,
        source_kind: SourceKind,
        records: Vec<Lenient<SourceRecord>>,
        observed_at: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Vec<(Uuid, Vec<SourceRecord>)> {
        let mut order = Vec::new();
        let mut groups: HashMap<Uuid, Vec<SourceRecord>> = HashMap::new();

        for record in records {
            let record = match record {
                Lenient::Parsed(record) => record,
                Lenient::Invalid(item) => {
                    report.skipped_records += 1;
                    report.issues.push(SyncIssue::Validation {
                        source_kind,
                        source_id: item.field("sourceId").unwrap_or_default(),
                        proposal_id: None,
                        item: "record".to_string(),
                        reason: item.reason,
                    });
                    continue;
                }
            };
            if let Err(e) = record.validate_envelope() {
                report.skipped_records += 1;
                report.issues.push(SyncIssue::Validation {
                    source_kind: record.kind(),
                    source_id: record.source_id().to_string(),
                    proposal_id: None,
                    item: "record".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }

            let decision = {
                let mut index = self.store.identities().await;
                self.linker.link(&mut index, &SourceClaim::from(&record))
            };
            let decision = match decision {
                Ok(decision) => decision,
                Err(issue) => {
                    report.skipped_records += 1;
                    report.issues.push(issue);
                    continue;
                }
            };

            if let Some(raw) = decision.unparseable_ref {
                let item = review_item(
                    ReviewKind::UnparseableRegistry,
                    &record,
                    Some(raw.clone()),
                    None,
                    observed_at,
                );
                let review_id = self.store.park_review(item).await;
                report.issues.push(SyncIssue::LinkingAmbiguity {
                    source_kind: record.kind(),
                    source_id: record.source_id().to_string(),
                    reason: format!("unparseable registry reference '{}'", raw),
                    review_id: Some(review_id),
                });
            }

            let id = match decision.outcome {
                LinkOutcome::Existing(id) => {
                    report.linked += 1;
                    id
                }
                LinkOutcome::Created(id) => {
                    report.created += 1;
                    id
                }
                LinkOutcome::NeedsReview {
                    candidate,
                    similarity,
                } => {
                    let mut item = review_item(
                        ReviewKind::TitleMatch,
                        &record,
                        None,
                        Some((candidate, similarity)),
                        observed_at,
                    );
                    let source_kind = record.kind();
                    let source_id = record.source_id().to_string();
                    item.record = Some(record);
                    let review_id = self.store.park_review(item).await;
                    report.parked += 1;
                    report.issues.push(SyncIssue::LinkingAmbiguity {
                        source_kind,
                        source_id,
                        reason: format!(
                            "no registry number; title matches proposal {} ({:.3})",
                            candidate, similarity
                        ),
                        review_id: Some(review_id),
                    });
                    continue;
                }
            };

            groups
                .entry(id)
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(record);
        }

        order
            .into_iter()
            .filter_map(|id| groups.remove(&id).map(|records| (id, records)))
            .collect()
    }

    // ---- manual review ----

    /// Accept a parked link and reconcile the parked record into the candidate
    pub async fn confirm_review(&self, review_id: Uuid) -> Result<ReviewResolution, AppError> {
        let item = self.store.review(review_id).await?;
        ensure_pending(&item)?;

        if item.kind == ReviewKind::UnparseableRegistry {
            let review = self
                .store
                .resolve_review(review_id, ReviewStatus::Confirmed, None)
                .await?;
            return Ok(ReviewResolution {
                review,
                issues: Vec::new(),
            });
        }

        let (candidate, record) = match (item.candidate, item.record) {
            (Some(candidate), Some(record)) => (candidate, record),
            _ => {
                return Err(AppError::Internal(format!(
                    "Review item {} has no parked record",
                    review_id
                )))
            }
        };

        {
            let mut index = self.store.identities().await;
            self.linker
                .attach(&mut index, candidate, &SourceClaim::from(&record))
                .map_err(|e| AppError::Conflict(e.to_string()))?;
        }

        let issues = self.reconcile_parked(candidate, record).await;
        let review = self
            .store
            .resolve_review(review_id, ReviewStatus::Confirmed, Some(candidate))
            .await?;
        info!("Review {} confirmed into proposal {}", review_id, candidate);
        Ok(ReviewResolution { review, issues })
    }

    /// Reject a parked link; a title-match record becomes its own proposal
    pub async fn dismiss_review(&self, review_id: Uuid) -> Result<ReviewResolution, AppError> {
        let item = self.store.review(review_id).await?;
        ensure_pending(&item)?;

        let (proposal, issues) = match (item.kind, item.record) {
            (ReviewKind::TitleMatch, Some(record)) => {
                let id = {
                    let mut index = self.store.identities().await;
                    self.linker
                        .create_identity(&mut index, &SourceClaim::from(&record))
                };
                (Some(id), self.reconcile_parked(id, record).await)
            }
            _ => (None, Vec::new()),
        };

        let review = self
            .store
            .resolve_review(review_id, ReviewStatus::Dismissed, proposal)
            .await?;
        info!("Review {} dismissed", review_id);
        Ok(ReviewResolution { review, issues })
    }

    async fn reconcile_parked(&self, id: Uuid, record: SourceRecord) -> Vec<SyncIssue> {
        let outcome = reconcile_proposal(
            &self.store,
            self.repository.as_ref(),
            id,
            std::slice::from_ref(&record),
            Utc::now(),
        )
        .await;
        self.publish_issues(Uuid::new_v4(), &outcome.issues).await;
        outcome.issues
    }

    // ---- maintenance ----

    /// Renumber a proposal's parliamentary stages to whole positions
    pub async fn resequence(&self, id: Uuid) -> Result<ProposalView, AppError> {
        self.store.get(id).await?;
        let slot = self.store.slot(id).await;
        let mut guard = slot.lock().await;
        let mut working = guard
            .clone()
            .ok_or_else(|| not_found_error(format!("Proposal {} not found", id)))?;

        if reconciler::resequence(&mut working) {
            working.proposal.last_modified = Utc::now();
            if let Some(repository) = &self.repository {
                repository.save(&working).await?;
            }
            *guard = Some(working.clone());
            info!("Resequenced parliamentary stages of proposal {}", id);
        }
        Ok(ProposalView::from_record(&working))
    }

    async fn publish_issues(&self, run_id: Uuid, issues: &[SyncIssue]) {
        for issue in issues {
            match issue {
                SyncIssue::LinkingCollision { .. } | SyncIssue::Persistence { .. } => {
                    error!(kind = issue.kind(), "{}", issue)
                }
                SyncIssue::SourceUnavailable { .. }
                | SyncIssue::PhaseRegression { .. }
                | SyncIssue::AmendmentRejected { .. }
                | SyncIssue::Validation { .. } => warn!(kind = issue.kind(), "{}", issue),
                SyncIssue::LinkingAmbiguity { .. } => info!(kind = issue.kind(), "{}", issue),
            }
            if issue.is_incident() {
                self.store.record_incident(run_id, issue.clone()).await;
            }
        }
    }
}

fn run_entry(report: &SyncReport, source_error: Option<String>) -> SyncRun {
    let counter = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
    let status = if source_error.is_some() {
        SyncRunStatus::Failed
    } else if report.cancelled {
        SyncRunStatus::Cancelled
    } else {
        SyncRunStatus::Completed
    };
    SyncRun {
        run_id: report.run_id,
        source_kind: report.source_kind,
        status,
        started_at: report.started_at,
        finished_at: report.finished_at,
        received: counter(report.received),
        linked: counter(report.linked),
        created: counter(report.created),
        updated: counter(report.updated),
        failed: counter(report.failed),
        developments: counter(report.developments),
        issues: counter(report.issues.len()),
        error: source_error,
    }
}

fn ensure_pending(item: &ReviewItem) -> Result<(), AppError> {
    if item.status != ReviewStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Review item {} is already resolved",
            item.id
        )));
    }
    Ok(())
}

fn review_item(
    kind: ReviewKind,
    record: &SourceRecord,
    raw_registry_ref: Option<String>,
    candidate: Option<(Uuid, f64)>,
    created_at: DateTime<Utc>,
) -> ReviewItem {
    ReviewItem {
        id: Uuid::new_v4(),
        kind,
        status: ReviewStatus::Pending,
        source_kind: record.kind(),
        source_id: record.source_id().to_string(),
        raw_registry_ref,
        candidate: candidate.map(|(id, _)| id),
        similarity: candidate.map(|(_, similarity)| similarity),
        record: None,
        created_at,
        resolved_at: None,
        resolved_proposal: None,
    }
}

// =============================================================================
// PER-PROPOSAL RECONCILIATION
// =============================================================================

/// Apply all of a run's records for one proposal under its slot lock.
/// The committed record is replaced only after the store write succeeded.
async fn reconcile_proposal(
    store: &ProposalStore,
    repository: Option<&ProposalRepository>,
    id: Uuid,
    records: &[SourceRecord],
    observed_at: DateTime<Utc>,
) -> ProposalOutcome {
    let slot = store.slot(id).await;
    let mut guard = slot.lock().await;
    let entry = store.identity(id).await;

    let mut working = guard
        .clone()
        .unwrap_or_else(|| ProposalRecord::new(id, observed_at));
    let mut outcome = ProposalOutcome::default();
    let mut added = 0;
    for record in records {
        added += apply_record(
            &mut working,
            entry.as_ref(),
            record,
            observed_at,
            &mut outcome.issues,
        );
    }

    if guard.as_ref() == Some(&working) {
        debug!(proposal = %id, "No changes");
        return outcome;
    }
    working.proposal.last_modified = observed_at;

    if let Some(repository) = repository {
        if let Err(e) = repository.save(&working).await {
            outcome.issues.push(SyncIssue::Persistence {
                proposal_id: id,
                reason: e.to_string(),
            });
            outcome.status = OutcomeStatus::Failed;
            return outcome;
        }
    }

    debug!(proposal = %id, phase = %working.proposal.phase, "Proposal reconciled");
    *guard = Some(working);
    outcome.status = OutcomeStatus::Updated;
    outcome.developments = added;
    outcome
}

/// Merge one record and re-derive everything that depends on it.
/// Returns the number of developments appended.
fn apply_record(
    working: &mut ProposalRecord,
    entry: Option<&IdentityEntry>,
    record: &SourceRecord,
    observed_at: DateTime<Utc>,
    issues: &mut Vec<SyncIssue>,
) -> usize {
    if let Some(entry) = entry {
        sync_identity(&mut working.proposal, entry);
    }

    let merge = match record {
        SourceRecord::Government(input) => reconciler::merge_government(working, input),
        SourceRecord::Parliamentary(input) => reconciler::merge_parliamentary(working, input),
    };
    let tally_touched = merge.tally_touched;
    let activated = merge.activated_government_stage;
    issues.extend(merge.issues);

    if tally_touched {
        voting::aggregate(working);
    }
    working.proposal.origin = working
        .proposal
        .initiator
        .as_deref()
        .and_then(Origin::from_initiator);

    derive_phase(working, activated, observed_at, issues)
}

fn sync_identity(proposal: &mut Proposal, entry: &IdentityEntry) {
    if entry.registry_number.is_some() {
        proposal.registry_number = entry.registry_number.clone();
    }
    if entry.government_source_id.is_some() {
        proposal.government_source_id = entry.government_source_id.clone();
    }
    if entry.parliamentary_source_id.is_some() {
        proposal.parliamentary_source_id = entry.parliamentary_source_id.clone();
    }
    if proposal.title.is_empty() && !entry.title.is_empty() {
        proposal.title = entry.title.clone();
    }
}

fn derive_phase(
    working: &mut ProposalRecord,
    activated_government_stage: bool,
    observed_at: DateTime<Utc>,
    issues: &mut Vec<SyncIssue>,
) -> usize {
    let current = working.proposal.phase;
    let evidence = phase::derive(working);
    let mut added = 0;

    match phase::advance(current, evidence.phase) {
        PhaseMove::Unchanged => {}
        PhaseMove::Advance(next) => {
            working.proposal.phase = next;
            info!(proposal = %working.id(), "Phase {} -> {}", current, next);
            let occurred_at = developments::occurrence(evidence.date, observed_at);
            if developments::record_transition(working, current, next, occurred_at, observed_at)
                .is_some()
            {
                added += 1;
            }
        }
        PhaseMove::Regression(indicated) => issues.push(SyncIssue::PhaseRegression {
            proposal_id: working.id(),
            current,
            indicated,
        }),
    }

    // A government stage turning active again after the bill left government
    let phase_now = working.proposal.phase;
    if activated_government_stage && phase_now != Phase::GovernmentStage {
        issues.push(SyncIssue::PhaseRegression {
            proposal_id: working.id(),
            current: phase_now,
            indicated: Phase::GovernmentStage,
        });
    }
    added
}
