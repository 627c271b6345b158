//! Phase deriver
//!
//! The phase is a pure function of a proposal's merged state: the highest
//! precedence reached by any stage or sub-record, short-circuited by
//! rejection and withdrawal signals. `advance` decides whether a derived
//! phase may replace the stored one.

use crate::proposal::{ParliamentaryStage, ParliamentaryStageType, Phase, ProposalRecord};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Rejection whose object is the bill itself
static BILL_REJECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        odrzuc\w*\s+(w\s+całości\s+|w\s+calosci\s+)?(projekt|ustaw)
        | (projekt|ustaw)\w*\s+(\w+\s+){0,2}odrzucon
        | rejected\s+the\s+(bill|draft)
        | (bill|draft)\s+(was\s+)?rejected
        | ^\s*(odrzucono|odrzucony|odrzucona|rejected)\s*\.?\s*$",
    )
    .expect("static regex")
});

/// Rejections of something other than the bill: motions, vetoes, amendments
const REJECTION_NEGATIONS: [&str; 11] = [
    "nie odrzuc",
    "wniosek o odrzucenie",
    "wniosku o odrzucenie",
    "not rejected",
    "motion to reject",
    "weto",
    "weta",
    "veto",
    "poprawk",
    "amendment",
    "uchwał",
];
const WITHDRAWAL_MARKERS: [&str; 3] = ["wycofan", "wycofal", "withdrawn"];

/// Derived phase and the date of the evidence that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEvidence {
    pub phase: Phase,
    pub date: Option<NaiveDate>,
}

/// What to do with a derived phase given the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMove {
    Unchanged,
    Advance(Phase),
    /// Derived phase would move backwards; ignored for phase purposes
    Regression(Phase),
}

pub fn signals_rejection(text: &str) -> bool {
    let lower = text.to_lowercase();
    !REJECTION_NEGATIONS.iter().any(|n| lower.contains(n)) && BILL_REJECTED.is_match(&lower)
}

pub fn signals_withdrawal(text: &str) -> bool {
    let lower = text.to_lowercase();
    WITHDRAWAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Phase a single parliamentary stage points at, if any
pub fn stage_phase(stage: &ParliamentaryStage) -> Option<Phase> {
    match stage.stage_type {
        ParliamentaryStageType::Intake
        | ParliamentaryStageType::Reading
        | ParliamentaryStageType::CommitteeWork
        | ParliamentaryStageType::Conclusion => Some(Phase::ParliamentaryStage),
        ParliamentaryStageType::SenatePosition => Some(Phase::UpperHouseStage),
        ParliamentaryStageType::ReferralToHeadOfState | ParliamentaryStageType::Signature => {
            Some(Phase::HeadOfStateStage)
        }
        ParliamentaryStageType::Unknown => None,
    }
}

pub fn derive(record: &ProposalRecord) -> PhaseEvidence {
    let proposal = &record.proposal;

    // Terminal short-circuits first, withdrawal before rejection
    let withdrawn_stage = record.parliamentary_stages.values().find(|s| {
        s.decision.as_deref().is_some_and(signals_withdrawal)
    });
    let status_withdrawn = proposal
        .government_status
        .as_deref()
        .is_some_and(signals_withdrawal);
    if proposal.withdrawal_signaled || status_withdrawn || withdrawn_stage.is_some() {
        return PhaseEvidence {
            phase: Phase::Withdrawn,
            date: withdrawn_stage.and_then(|s| s.date),
        };
    }

    // An upper-house rejection can still be overridden by the lower house
    let rejecting_stage = record.parliamentary_stages.values().find(|s| {
        !matches!(
            s.stage_type,
            ParliamentaryStageType::SenatePosition | ParliamentaryStageType::Unknown
        ) && s.decision.as_deref().is_some_and(signals_rejection)
    });
    if let Some(stage) = rejecting_stage {
        return PhaseEvidence {
            phase: Phase::Rejected,
            date: stage.date,
        };
    }

    let mut best = PhaseEvidence {
        phase: Phase::GovernmentStage,
        date: record
            .government_stages
            .values()
            .filter_map(|s| s.start_date)
            .min()
            .or(proposal.creation_date),
    };
    let mut consider = |phase: Phase, date: Option<NaiveDate>| {
        match phase.precedence().cmp(&best.phase.precedence()) {
            std::cmp::Ordering::Greater => best = PhaseEvidence { phase, date },
            std::cmp::Ordering::Equal => {
                // earliest evidence marks when the phase was entered
                best.date = match (best.date, date) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
            std::cmp::Ordering::Less => {}
        }
    };

    for stage in record.parliamentary_stages.values() {
        if let Some(phase) = stage_phase(stage) {
            consider(phase, stage.date);
        }
    }
    if let Some(senate) = &record.senate_position {
        consider(Phase::UpperHouseStage, senate.date);
    }
    if let Some(action) = &record.presidential_action {
        consider(Phase::HeadOfStateStage, action.signature_date.or(action.veto_date));
    }
    if let Some(publication) = &record.publication {
        consider(Phase::Published, publication.date);
    }

    best
}

/// Forward-only transition rule with terminal short-circuits
pub fn advance(current: Phase, derived: Phase) -> PhaseMove {
    if current == derived {
        return PhaseMove::Unchanged;
    }
    if current.is_terminal() {
        return PhaseMove::Regression(derived);
    }
    if derived.is_terminal() || derived.precedence() > current.precedence() {
        return PhaseMove::Advance(derived);
    }
    PhaseMove::Regression(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{PresidentialAction, PublicationRecord, StageSeq};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn stage(position: u32, stage_type: ParliamentaryStageType, decision: Option<&str>) -> ParliamentaryStage {
        ParliamentaryStage {
            seq: StageSeq::whole(position),
            source_seq: Some(position),
            stage_type,
            source_type: stage_type.as_str().to_string(),
            name: format!("stage {}", position),
            date: NaiveDate::from_ymd_opt(2025, 5, position),
            decision: decision.map(str::to_string),
            print_number: None,
            committee_code: None,
            rapporteur: None,
            tally: None,
        }
    }

    fn record() -> ProposalRecord {
        ProposalRecord::new(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_empty_record_is_in_government_stage() {
        assert_eq!(derive(&record()).phase, Phase::GovernmentStage);
    }

    #[test]
    fn test_highest_precedence_wins_with_entry_date() {
        let mut r = record();
        for (i, t) in [
            ParliamentaryStageType::Intake,
            ParliamentaryStageType::Reading,
            ParliamentaryStageType::SenatePosition,
            ParliamentaryStageType::Unknown,
        ]
        .into_iter()
        .enumerate()
        {
            let s = stage(i as u32 + 1, t, None);
            r.parliamentary_stages.insert(s.seq, s);
        }
        let evidence = derive(&r);
        assert_eq!(evidence.phase, Phase::UpperHouseStage);
        assert_eq!(evidence.date, NaiveDate::from_ymd_opt(2025, 5, 3));

        r.publication = Some(PublicationRecord {
            reference: "Dz.U. 2025 poz. 1001".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 8, 1),
            amended: false,
        });
        assert_eq!(derive(&r).phase, Phase::Published);
    }

    #[test]
    fn test_rejection_markers_respect_negation() {
        assert!(signals_rejection("Sejm odrzucił projekt"));
        assert!(signals_rejection("Projekt odrzucony w pierwszym czytaniu"));
        assert!(!signals_rejection("Wniosek o odrzucenie projektu nie został przyjęty"));
        assert!(!signals_rejection("skierowano do komisji"));
        assert!(signals_rejection("Odrzucono"));
        assert!(signals_rejection("Projekt ustawy został odrzucony"));
    }

    #[test]
    fn test_rejecting_veto_or_amendments_is_not_a_bill_rejection() {
        assert!(!signals_rejection("Sejm odrzucił weto Prezydenta"));
        assert!(!signals_rejection("Sejm odrzucil weto Prezydenta"));
        assert!(!signals_rejection("Sejm odrzucił poprawki Senatu"));
        assert!(!signals_rejection("Sejm odrzucił uchwałę Senatu o odrzuceniu ustawy"));

        let mut r = record();
        for (i, (t, decision)) in [
            (ParliamentaryStageType::Reading, "uchwalono"),
            (ParliamentaryStageType::Reading, "Sejm odrzucił poprawki Senatu"),
            (ParliamentaryStageType::ReferralToHeadOfState, "Sejm odrzucił weto Prezydenta"),
        ]
        .into_iter()
        .enumerate()
        {
            let s = stage(i as u32 + 1, t, Some(decision));
            r.parliamentary_stages.insert(s.seq, s);
        }
        assert_eq!(derive(&r).phase, Phase::HeadOfStateStage);
    }

    #[test]
    fn test_unknown_stage_never_rejects() {
        let mut r = record();
        let s = stage(1, ParliamentaryStageType::Unknown, Some("Odrzucono projekt"));
        r.parliamentary_stages.insert(s.seq, s);
        assert_eq!(derive(&r).phase, Phase::GovernmentStage);
    }

    #[test]
    fn test_senate_rejection_does_not_reject() {
        let mut r = record();
        let s = stage(1, ParliamentaryStageType::SenatePosition, Some("Senat odrzucił ustawę"));
        r.parliamentary_stages.insert(s.seq, s);
        assert_eq!(derive(&r).phase, Phase::UpperHouseStage);
    }

    #[test]
    fn test_withdrawal_signal_wins() {
        let mut r = record();
        r.presidential_action = Some(PresidentialAction {
            signature_date: NaiveDate::from_ymd_opt(2025, 7, 1),
            veto_date: None,
            amended: false,
        });
        r.proposal.government_status = Some("Projekt wycofany".to_string());
        assert_eq!(derive(&r).phase, Phase::Withdrawn);
    }

    #[test]
    fn test_advance_is_forward_only() {
        assert_eq!(advance(Phase::GovernmentStage, Phase::ParliamentaryStage), PhaseMove::Advance(Phase::ParliamentaryStage));
        assert_eq!(advance(Phase::UpperHouseStage, Phase::ParliamentaryStage), PhaseMove::Regression(Phase::ParliamentaryStage));
        assert_eq!(advance(Phase::UpperHouseStage, Phase::Rejected), PhaseMove::Advance(Phase::Rejected));
        assert_eq!(advance(Phase::Rejected, Phase::HeadOfStateStage), PhaseMove::Regression(Phase::HeadOfStateStage));
        assert_eq!(advance(Phase::Published, Phase::Published), PhaseMove::Unchanged);
    }
}
