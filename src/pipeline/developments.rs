//! Development log generator
//!
//! Appends one immutable, classified event per distinct phase transition.

use crate::proposal::{Classification, Development, Phase, ProposalRecord};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Fixed classification table, keyed on the phase entered
pub fn classify(new_phase: Phase) -> Classification {
    match new_phase {
        Phase::ParliamentaryStage | Phase::UpperHouseStage | Phase::Published => {
            Classification::Positive
        }
        Phase::Rejected | Phase::Withdrawn => Classification::Negative,
        Phase::GovernmentStage | Phase::HeadOfStateStage => Classification::Neutral,
    }
}

pub fn title_for(new_phase: Phase) -> &'static str {
    match new_phase {
        Phase::GovernmentStage => "Bill returned to government work",
        Phase::ParliamentaryStage => "Bill sent to parliament",
        Phase::UpperHouseStage => "Bill passed to the Senate",
        Phase::HeadOfStateStage => "Bill sent to the President",
        Phase::Published => "Act published in the official journal",
        Phase::Rejected => "Bill rejected",
        Phase::Withdrawn => "Bill withdrawn",
    }
}

/// Evidence date at midnight UTC, or the sync time when unknown
pub fn occurrence(date: Option<NaiveDate>, observed_at: DateTime<Utc>) -> DateTime<Utc> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(observed_at)
}

/// Log a transition unless the same (prior, new) pair is already recorded.
/// Returns the new development, if one was appended.
pub fn record_transition(
    record: &mut ProposalRecord,
    prior: Phase,
    new: Phase,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
) -> Option<Development> {
    if prior == new {
        return None;
    }
    let duplicate = record
        .developments
        .iter()
        .any(|d| d.prior_phase == prior && d.new_phase == new);
    if duplicate {
        return None;
    }

    let development = Development {
        id: Uuid::new_v4(),
        proposal_id: record.id(),
        title: title_for(new).to_string(),
        classification: classify(new),
        prior_phase: prior,
        new_phase: new,
        occurred_at,
        recorded_at,
    };
    record.developments.push(development.clone());
    Some(development)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(Phase::ParliamentaryStage), Classification::Positive);
        assert_eq!(classify(Phase::UpperHouseStage), Classification::Positive);
        assert_eq!(classify(Phase::Published), Classification::Positive);
        assert_eq!(classify(Phase::Rejected), Classification::Negative);
        assert_eq!(classify(Phase::Withdrawn), Classification::Negative);
        assert_eq!(classify(Phase::HeadOfStateStage), Classification::Neutral);
    }

    #[test]
    fn test_duplicate_transition_is_not_logged() {
        let now = Utc::now();
        let mut record = ProposalRecord::new(Uuid::new_v4(), now);
        let first = record_transition(&mut record, Phase::GovernmentStage, Phase::ParliamentaryStage, now, now);
        assert!(first.is_some());
        let again = record_transition(&mut record, Phase::GovernmentStage, Phase::ParliamentaryStage, now, now);
        assert!(again.is_none());
        assert!(record_transition(&mut record, Phase::Rejected, Phase::Rejected, now, now).is_none());
        assert_eq!(record.developments.len(), 1);
        assert_eq!(record.developments[0].title, "Bill sent to parliament");
    }

    #[test]
    fn test_occurrence_prefers_evidence_date() {
        let observed = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 3);
        assert_eq!(occurrence(date, observed), Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap());
        assert_eq!(occurrence(None, observed), observed);
    }
}
