//! Read model
//!
//! Query side of the store: the unified proposal view, filtered listings and
//! the development feed.

use crate::error::AppError;
use crate::proposal::{
    fold_text, Classification, Development, GovernmentStage, Origin, ParliamentaryStage, Phase, Proposal,
    ProposalRecord, ProposalStore, PresidentialAction, PublicationRecord, SenatePosition, Voting,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

const DEFAULT_PAGE: usize = 50;
pub const MAX_PAGE: usize = 500;

// =============================================================================
// VIEWS
// =============================================================================

/// Everything known about one proposal, stage maps flattened in order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalView {
    pub proposal: Proposal,
    pub government_stages: Vec<GovernmentStage>,
    pub parliamentary_stages: Vec<ParliamentaryStage>,
    pub voting: Option<Voting>,
    pub senate_position: Option<SenatePosition>,
    pub presidential_action: Option<PresidentialAction>,
    pub publication: Option<PublicationRecord>,
    pub latest_stage: Option<String>,
    pub development_count: usize,
    /// SHA-256 over the canonical serialization of the fields above
    pub checksum: String,
}

impl ProposalView {
    pub fn from_record(record: &ProposalRecord) -> Self {
        let mut view = Self {
            proposal: record.proposal.clone(),
            government_stages: record.government_stages.values().cloned().collect(),
            parliamentary_stages: record.parliamentary_stages.values().cloned().collect(),
            voting: record.voting.clone(),
            senate_position: record.senate_position.clone(),
            presidential_action: record.presidential_action.clone(),
            publication: record.publication.clone(),
            latest_stage: record.latest_stage_name().map(str::to_string),
            development_count: record.developments.len(),
            checksum: String::new(),
        };
        view.checksum = view.compute_checksum();
        view
    }

    fn compute_checksum(&self) -> String {
        let canonical = serde_json::to_vec(&(
            &self.proposal,
            &self.government_stages,
            &self.parliamentary_stages,
            &self.voting,
            &self.senate_position,
            &self.presidential_action,
            &self.publication,
            self.development_count,
        ))
        .unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}

/// Listing row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: Uuid,
    pub title: String,
    pub registry_number: Option<String>,
    pub print_number: Option<String>,
    pub initiator: Option<String>,
    pub origin: Option<Origin>,
    pub topic: Option<String>,
    pub phase: Phase,
    pub latest_stage: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl From<&ProposalRecord> for ProposalSummary {
    fn from(record: &ProposalRecord) -> Self {
        let p = &record.proposal;
        Self {
            id: p.id,
            title: p.title.clone(),
            registry_number: p.registry_number.clone(),
            print_number: p.print_number.clone(),
            initiator: p.initiator.clone(),
            origin: p.origin,
            topic: p.topic.clone(),
            phase: p.phase,
            latest_stage: record.latest_stage_name().map(str::to_string),
            last_modified: p.last_modified,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFilter {
    pub phase: Option<Phase>,
    pub topic: Option<String>,
    pub text_query: Option<String>,
    pub origin: Option<Origin>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ProposalFilter {
    fn matches(&self, record: &ProposalRecord) -> bool {
        let p = &record.proposal;
        if self.phase.is_some_and(|phase| phase != p.phase) {
            return false;
        }
        if self.origin.is_some() && self.origin != p.origin {
            return false;
        }
        if let Some(topic) = self.topic.as_deref() {
            let wanted = fold_text(topic.trim());
            match &p.topic {
                Some(t) if fold_text(t).contains(&wanted) => {}
                _ => return false,
            }
        }
        if let Some(q) = self.text_query.as_deref() {
            let q = fold_text(q.trim());
            if !q.is_empty() {
                let haystacks = [
                    Some(p.title.as_str()),
                    p.registry_number.as_deref(),
                    p.print_number.as_deref(),
                    p.initiator.as_deref(),
                ];
                if !haystacks.iter().flatten().any(|h| fold_text(h).contains(&q)) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevelopmentFilter {
    pub proposal_id: Option<Uuid>,
    pub classification: Option<Classification>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStats {
    pub total: usize,
    pub by_phase: BTreeMap<String, usize>,
    pub developments: usize,
    pub pending_reviews: usize,
    pub incidents: usize,
}

// =============================================================================
// QUERIES
// =============================================================================

impl ProposalStore {
    /// GetProposal
    pub async fn get_view(&self, id: Uuid) -> Result<ProposalView, AppError> {
        let record = self.get(id).await?;
        Ok(ProposalView::from_record(&record))
    }

    /// ListProposals, most recently modified first
    pub async fn list_proposals(&self, filter: &ProposalFilter) -> Vec<ProposalSummary> {
        let mut records: Vec<ProposalRecord> = self
            .all()
            .await
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by(|a, b| {
            b.proposal
                .last_modified
                .cmp(&a.proposal.last_modified)
                .then_with(|| a.proposal.id.cmp(&b.proposal.id))
        });

        let limit = filter.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
        records
            .iter()
            .skip(filter.offset.unwrap_or(0))
            .take(limit)
            .map(ProposalSummary::from)
            .collect()
    }

    /// ListDevelopments, newest first
    pub async fn list_developments(&self, filter: &DevelopmentFilter) -> Vec<Development> {
        let records = match filter.proposal_id {
            Some(id) => self.get(id).await.map(|r| vec![r]).unwrap_or_default(),
            None => self.all().await,
        };

        let mut developments: Vec<Development> = records
            .into_iter()
            .flat_map(|r| r.developments)
            .filter(|d| filter.classification.map_or(true, |c| d.classification == c))
            .filter(|d| filter.since.map_or(true, |since| d.occurred_at >= since))
            .collect();
        developments.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
        });
        developments.truncate(filter.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE));
        developments
    }

    pub async fn stats(&self) -> ProposalStats {
        let records = self.all().await;
        let mut by_phase: BTreeMap<String, usize> =
            Phase::ALL.iter().map(|p| (p.as_str().to_string(), 0)).collect();
        for record in &records {
            *by_phase.entry(record.proposal.phase.as_str().to_string()).or_default() += 1;
        }
        ProposalStats {
            total: records.len(),
            by_phase,
            developments: records.iter().map(|r| r.developments.len()).sum(),
            pending_reviews: self.pending_reviews().await.len(),
            incidents: self.incidents().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn record(title: &str, phase: Phase, modified_days: i64) -> ProposalRecord {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut r = ProposalRecord::new(Uuid::new_v4(), base);
        r.proposal.title = title.to_string();
        r.proposal.phase = phase;
        r.proposal.topic = Some("Zdrowie".to_string());
        r.proposal.last_modified = base + Duration::days(modified_days);
        r
    }

    #[test]
    fn test_checksum_tracks_content() {
        let r = record("Projekt ustawy o zdrowiu", Phase::GovernmentStage, 0);
        let a = ProposalView::from_record(&r);
        let b = ProposalView::from_record(&r.clone());
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);

        let mut changed = r.clone();
        changed.proposal.phase = Phase::ParliamentaryStage;
        assert_ne!(ProposalView::from_record(&changed).checksum, a.checksum);
    }

    #[tokio::test]
    async fn test_list_proposals_filters_and_sorts() {
        let store = ProposalStore::new();
        store
            .hydrate(vec![
                record("Projekt ustawy o zdrowiu publicznym", Phase::ParliamentaryStage, 1),
                record("Projekt ustawy o podatku", Phase::GovernmentStage, 3),
                record("Ustawa o świadczeniach zdrowotnych", Phase::ParliamentaryStage, 2),
            ])
            .await;

        let filter = ProposalFilter {
            phase: Some(Phase::ParliamentaryStage),
            ..Default::default()
        };
        let listed = store.list_proposals(&filter).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "Ustawa o świadczeniach zdrowotnych");

        let filter = ProposalFilter {
            text_query: Some("SWIADCZENIACH".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list_proposals(&filter).await.len(), 1);

        let filter = ProposalFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        let page = store.list_proposals(&filter).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Ustawa o świadczeniach zdrowotnych");
    }

    #[tokio::test]
    async fn test_stats_counts_every_phase() {
        let store = ProposalStore::new();
        store
            .hydrate(vec![record("A", Phase::Rejected, 0), record("B", Phase::Rejected, 0)])
            .await;
        let stats = store.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_phase["rejected"], 2);
        assert_eq!(stats.by_phase["published"], 0);
    }
}
