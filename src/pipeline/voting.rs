//! Voting aggregator
//!
//! Validates tallies carried by parliamentary stages and keeps the single
//! current `Voting` of a proposal in step with its latest voting-bearing stage.

use crate::models::sources::ParliamentaryStageInput;
use crate::proposal::{
    DominantVote, PartyVote, ProposalRecord, VoteTally, Voting, VotingByParty, VotingResult,
};
use std::collections::HashSet;
use uuid::Uuid;

/// Tally reported on a stage; `Ok(None)` when the stage carries no vote
pub fn tally_from_input(stage: &ParliamentaryStageInput) -> Result<Option<VoteTally>, String> {
    if !stage.has_tally() {
        return Ok(None);
    }
    let (Some(yes), Some(no), Some(abstain)) = (stage.voting_yes, stage.voting_no, stage.voting_abstain)
    else {
        return Err("incomplete tally: yes, no and abstain must be reported together".to_string());
    };

    let cast = u64::from(yes) + u64::from(no) + u64::from(abstain);
    let total = match stage.voting_total {
        Some(total) => total,
        None => u32::try_from(cast).map_err(|_| "tally overflows".to_string())?,
    };
    if cast > u64::from(total) {
        return Err(format!(
            "yes + no + abstain ({}) exceeds total ({})",
            cast, total
        ));
    }

    let mut seen = HashSet::new();
    let mut by_party = Vec::new();
    for row in stage.voting_by_party.iter().flatten() {
        let party = row.party.trim();
        if party.is_empty() {
            return Err("party breakdown row without a party name".to_string());
        }
        if !seen.insert(party.to_string()) {
            return Err(format!("party '{}' reported twice", party));
        }
        by_party.push(PartyVote {
            party: party.to_string(),
            yes: row.yes,
            no: row.no,
            abstain: row.abstain,
            absent: row.absent,
        });
    }

    Ok(Some(VoteTally {
        yes,
        no,
        abstain,
        total,
        date: stage.voting_date.or(stage.date),
        sitting: stage.sitting,
        voting_number: stage.voting_number,
        by_party,
    }))
}

/// Largest of the three counts; ties resolve yes, then no
pub fn dominant_vote(yes: u32, no: u32, abstain: u32) -> DominantVote {
    if yes >= no && yes >= abstain {
        DominantVote::Yes
    } else if no >= abstain {
        DominantVote::No
    } else {
        DominantVote::Abstain
    }
}

pub fn voting_result(yes: u32, no: u32) -> VotingResult {
    if yes > no {
        VotingResult::Passed
    } else {
        VotingResult::Rejected
    }
}

/// Replace the current voting with the one from the latest voting-bearing
/// stage. Returns whether the stored voting changed.
pub fn aggregate(record: &mut ProposalRecord) -> bool {
    let latest = record
        .parliamentary_stages
        .iter()
        .rev()
        .find_map(|(seq, stage)| stage.tally.as_ref().map(|t| (*seq, t)));
    let Some((source_stage, tally)) = latest else {
        return false;
    };

    let voting = Voting {
        id: record.voting.as_ref().map_or_else(Uuid::new_v4, |v| v.id),
        date: tally.date,
        yes: tally.yes,
        no: tally.no,
        abstain: tally.abstain,
        total: tally.total,
        result: voting_result(tally.yes, tally.no),
        sitting: tally.sitting,
        voting_number: tally.voting_number,
        source_stage,
        by_party: tally
            .by_party
            .iter()
            .map(|p| VotingByParty {
                party: p.party.clone(),
                yes: p.yes,
                no: p.no,
                abstain: p.abstain,
                absent: p.absent,
                dominant_vote: dominant_vote(p.yes, p.no, p.abstain),
            })
            .collect(),
    };

    if record.voting.as_ref() == Some(&voting) {
        return false;
    }
    record.voting = Some(voting);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sources::PartyVoteInput;
    use crate::proposal::{ParliamentaryStage, ParliamentaryStageType, StageSeq};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn stage_input(yes: Option<u32>, no: Option<u32>, abstain: Option<u32>) -> ParliamentaryStageInput {
        ParliamentaryStageInput {
            seq: 3,
            stage_type: "Voting".to_string(),
            name: "Głosowanie".to_string(),
            date: None,
            decision: None,
            print_number: None,
            voting_yes: yes,
            voting_no: no,
            voting_abstain: abstain,
            voting_total: None,
            voting_date: None,
            sitting: Some(12),
            voting_number: Some(40),
            voting_by_party: None,
            committee_code: None,
            rapporteur: None,
        }
    }

    fn tallied_stage(position: u32, yes: u32, no: u32) -> ParliamentaryStage {
        ParliamentaryStage {
            seq: StageSeq::whole(position),
            source_seq: Some(position),
            stage_type: ParliamentaryStageType::Reading,
            source_type: "Voting".to_string(),
            name: format!("Głosowanie {}", position),
            date: None,
            decision: None,
            print_number: None,
            committee_code: None,
            rapporteur: None,
            tally: Some(VoteTally {
                yes,
                no,
                abstain: 0,
                total: yes + no,
                date: None,
                sitting: None,
                voting_number: None,
                by_party: vec![],
            }),
        }
    }

    #[test]
    fn test_total_defaults_to_sum() {
        let tally = tally_from_input(&stage_input(Some(428), Some(3), Some(0))).unwrap().unwrap();
        assert_eq!(tally.total, 431);
        assert_eq!(tally.sitting, Some(12));
    }

    #[test]
    fn test_counts_above_total_are_rejected_not_clamped() {
        let mut input = stage_input(Some(300), Some(100), Some(60));
        input.voting_total = Some(450);
        let err = tally_from_input(&input).unwrap_err();
        assert!(err.contains("exceeds total"));
    }

    #[test]
    fn test_partial_tally_is_invalid() {
        assert!(tally_from_input(&stage_input(Some(10), None, Some(0))).is_err());
        assert_eq!(tally_from_input(&stage_input(None, None, None)).unwrap(), None);
    }

    #[test]
    fn test_duplicate_party_rows_are_invalid() {
        let mut input = stage_input(Some(10), Some(0), Some(0));
        let row = PartyVoteInput {
            party: "KO".to_string(),
            yes: 5,
            no: 0,
            abstain: 0,
            absent: 1,
        };
        input.voting_by_party = Some(vec![row.clone(), row]);
        assert!(tally_from_input(&input).is_err());
    }

    #[test]
    fn test_dominant_vote_prefers_yes_on_ties() {
        assert_eq!(dominant_vote(10, 10, 0), DominantVote::Yes);
        assert_eq!(dominant_vote(1, 10, 10), DominantVote::No);
        assert_eq!(dominant_vote(1, 2, 10), DominantVote::Abstain);
    }

    #[test]
    fn test_latest_voting_replaces_earlier_and_keeps_id() {
        let mut record = ProposalRecord::new(Uuid::new_v4(), Utc::now());
        record.parliamentary_stages.insert(StageSeq::whole(1), tallied_stage(1, 428, 3));
        assert!(aggregate(&mut record));
        let first_id = record.voting.as_ref().unwrap().id;

        record.parliamentary_stages.insert(StageSeq::whole(2), tallied_stage(2, 430, 2));
        assert!(aggregate(&mut record));
        let voting = record.voting.as_ref().unwrap();
        assert_eq!((voting.yes, voting.no), (430, 2));
        assert_eq!(voting.id, first_id);
        assert_eq!(voting.result, VotingResult::Passed);

        assert!(!aggregate(&mut record));
    }
}
