//! Proposal data models
//!
//! Canonical per-proposal state: identity, the merged stage collections,
//! the current voting, the optional sub-records and the development log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// PHASE
// =============================================================================

/// Coarse-grained location of a proposal in the legislative lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Government process (up to 14 stages)
    GovernmentStage,
    /// Lower house: readings, committee work, votes
    ParliamentaryStage,
    /// Upper house position
    UpperHouseStage,
    /// Awaiting or after head-of-state decision
    HeadOfStateStage,
    /// Published in the official journal
    Published,
    /// Rejected at any stage
    Rejected,
    /// Withdrawn by the initiator
    Withdrawn,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::GovernmentStage
    }
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::GovernmentStage,
        Phase::ParliamentaryStage,
        Phase::UpperHouseStage,
        Phase::HeadOfStateStage,
        Phase::Published,
        Phase::Rejected,
        Phase::Withdrawn,
    ];

    /// Position in the forward ordering; `None` for the two short-circuit states
    pub fn precedence(self) -> Option<u8> {
        match self {
            Phase::GovernmentStage => Some(0),
            Phase::ParliamentaryStage => Some(1),
            Phase::UpperHouseStage => Some(2),
            Phase::HeadOfStateStage => Some(3),
            Phase::Published => Some(4),
            Phase::Rejected | Phase::Withdrawn => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Published | Phase::Rejected | Phase::Withdrawn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::GovernmentStage => "government_stage",
            Phase::ParliamentaryStage => "parliamentary_stage",
            Phase::UpperHouseStage => "upper_house_stage",
            Phase::HeadOfStateStage => "head_of_state_stage",
            Phase::Published => "published",
            Phase::Rejected => "rejected",
            Phase::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

/// Where a proposal came from, derived from its initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Government,
    Deputies,
    Senate,
    Citizens,
    President,
}

impl Origin {
    /// Rule-based classification of an initiator string
    pub fn from_initiator(initiator: &str) -> Option<Self> {
        let lower = initiator.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["poselski", "komisja", "posłów", "deputies"]) {
            Some(Origin::Deputies)
        } else if has(&["senacki", "senat"]) {
            Some(Origin::Senate)
        } else if has(&["obywatelski", "obywateli", "citizens"]) {
            Some(Origin::Citizens)
        } else if has(&["prezydent", "president"]) {
            Some(Origin::President)
        } else if has(&["minister", "rada ministrów", "szef kprm", "government"])
            || lower.split_whitespace().any(|w| w == "rm")
        {
            Some(Origin::Government)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Government => "government",
            Origin::Deputies => "deputies",
            Origin::Senate => "senate",
            Origin::Citizens => "citizens",
            Origin::President => "president",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "government" => Ok(Origin::Government),
            "deputies" => Ok(Origin::Deputies),
            "senate" => Ok(Origin::Senate),
            "citizens" => Ok(Origin::Citizens),
            "president" => Ok(Origin::President),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

// =============================================================================
// STAGES
// =============================================================================

/// One of the (up to 14) ordered government-process stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernmentStage {
    pub seq: u8,
    pub name: String,
    pub active: bool,
    pub start_date: Option<NaiveDate>,
    pub last_modified: Option<NaiveDate>,
    pub catalog_id: Option<String>,
}

/// Position of a parliamentary stage.
///
/// Stored as fixed-point ticks so a stage discovered late can be slotted
/// between two neighbours without renumbering them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct StageSeq(u32);

impl StageSeq {
    pub const TICKS: u32 = 1_000;

    pub fn whole(position: u32) -> Self {
        Self(position.saturating_mul(Self::TICKS))
    }

    pub fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    pub fn ticks(self) -> u32 {
        self.0
    }

    pub fn is_whole(self) -> bool {
        self.0 % Self::TICKS == 0
    }

    /// First whole position after `last`
    pub fn next_after(last: Option<StageSeq>) -> Self {
        Self::whole(last.map_or(0, |s| s.0 / Self::TICKS) + 1)
    }

    /// Midpoint strictly between `lower` (or zero) and `upper`, if one exists
    pub fn between(lower: Option<StageSeq>, upper: StageSeq) -> Option<Self> {
        let lo = lower.map_or(0, |s| s.0);
        if upper.0 <= lo || upper.0 - lo < 2 {
            return None;
        }
        Some(Self(lo + (upper.0 - lo) / 2))
    }
}

impl From<StageSeq> for f64 {
    fn from(seq: StageSeq) -> f64 {
        f64::from(seq.0) / f64::from(StageSeq::TICKS)
    }
}

impl TryFrom<f64> for StageSeq {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let ticks = (value * f64::from(StageSeq::TICKS)).round();
        if !ticks.is_finite() || ticks < 0.0 || ticks > f64::from(u32::MAX) {
            return Err(format!("invalid stage sequence {}", value));
        }
        Ok(Self(ticks as u32))
    }
}

impl fmt::Display for StageSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole() {
            write!(f, "{}", self.0 / Self::TICKS)
        } else {
            write!(f, "{}", f64::from(*self))
        }
    }
}

/// Closed set of parliamentary stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParliamentaryStageType {
    Intake,
    Reading,
    CommitteeWork,
    SenatePosition,
    ReferralToHeadOfState,
    Signature,
    Conclusion,
    /// Anything the parliamentary source reports that we do not know yet
    Unknown,
}

impl ParliamentaryStageType {
    /// Map a source-reported stage type string; never fails
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "intake" | "start" | "receipt" => Self::Intake,
            "reading" | "firstreading" | "secondreading" | "thirdreading" | "sejmreading"
            | "readingreferral" | "voting" => Self::Reading,
            "committeework" | "committeereport" | "referral" | "committee" => Self::CommitteeWork,
            "senateposition" | "senatepositionconsideration" => Self::SenatePosition,
            "referraltoheadofstate" | "topresident" | "referraltopresident" => {
                Self::ReferralToHeadOfState
            }
            "signature" | "presidentsignature" => Self::Signature,
            "conclusion" | "end" | "closure" => Self::Conclusion,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Reading => "reading",
            Self::CommitteeWork => "committee_work",
            Self::SenatePosition => "senate_position",
            Self::ReferralToHeadOfState => "referral_to_head_of_state",
            Self::Signature => "signature",
            Self::Conclusion => "conclusion",
            Self::Unknown => "unknown",
        }
    }
}

/// One step of the parliamentary process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParliamentaryStage {
    pub seq: StageSeq,
    /// Position the source reported the stage at when it was last seen
    pub source_seq: Option<u32>,
    pub stage_type: ParliamentaryStageType,
    /// Raw type string as reported (kept for unknown types)
    pub source_type: String,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub decision: Option<String>,
    pub print_number: Option<String>,
    pub committee_code: Option<String>,
    pub rapporteur: Option<String>,
    pub tally: Option<VoteTally>,
}

/// Vote counts carried by a voting-bearing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub total: u32,
    pub date: Option<NaiveDate>,
    pub sitting: Option<u32>,
    pub voting_number: Option<u32>,
    pub by_party: Vec<PartyVote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyVote {
    pub party: String,
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub absent: u32,
}

// =============================================================================
// VOTING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingResult {
    Passed,
    Rejected,
}

impl VotingResult {
    pub fn as_str(self) -> &'static str {
        match self {
            VotingResult::Passed => "passed",
            VotingResult::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DominantVote {
    Yes,
    No,
    Abstain,
}

impl DominantVote {
    pub fn as_str(self) -> &'static str {
        match self {
            DominantVote::Yes => "YES",
            DominantVote::No => "NO",
            DominantVote::Abstain => "ABSTAIN",
        }
    }
}

/// The single current voting of a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voting {
    pub id: Uuid,
    pub date: Option<NaiveDate>,
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub total: u32,
    pub result: VotingResult,
    pub sitting: Option<u32>,
    pub voting_number: Option<u32>,
    /// Parliamentary stage the tallies were taken from
    pub source_stage: StageSeq,
    pub by_party: Vec<VotingByParty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingByParty {
    pub party: String,
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub absent: u32,
    pub dominant_vote: DominantVote,
}

// =============================================================================
// SUB-RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenateStance {
    WithoutAmendments,
    WithAmendments,
    Rejected,
    Other,
}

impl SenateStance {
    pub fn parse(position: &str) -> Self {
        let lower = position.to_lowercase();
        if lower.contains("bez poprawek") || lower.contains("without amendments") {
            SenateStance::WithoutAmendments
        } else if lower.contains("poprawk") || lower.contains("amendment") {
            SenateStance::WithAmendments
        } else if lower.contains("odrzuc") || lower.contains("reject") {
            SenateStance::Rejected
        } else {
            SenateStance::Other
        }
    }
}

/// Upper-house decision on a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenatePosition {
    pub date: Option<NaiveDate>,
    pub stance: SenateStance,
    pub position: String,
    pub print_number: Option<String>,
    /// Lower-house decision on the upper-house position
    pub decision: Option<String>,
    pub amended: bool,
}

/// Head-of-state signature or veto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresidentialAction {
    pub signature_date: Option<NaiveDate>,
    pub veto_date: Option<NaiveDate>,
    pub amended: bool,
}

/// Official journal publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationRecord {
    pub reference: String,
    pub date: Option<NaiveDate>,
    pub amended: bool,
}

// =============================================================================
// DEVELOPMENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Positive,
    Negative,
    Neutral,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Positive => "positive",
            Classification::Negative => "negative",
            Classification::Neutral => "neutral",
        }
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Classification::Positive),
            "negative" => Ok(Classification::Negative),
            "neutral" => Ok(Classification::Neutral),
            other => Err(format!("unknown classification '{}'", other)),
        }
    }
}

/// Immutable record of one phase transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Development {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub title: String,
    pub classification: Classification,
    pub prior_phase: Phase,
    pub new_phase: Phase,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// PROPOSAL
// =============================================================================

/// The canonical proposal entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub government_source_id: Option<String>,
    pub parliamentary_source_id: Option<String>,
    pub registry_number: Option<String>,
    pub print_number: Option<String>,
    pub publication_id: Option<String>,
    pub title: String,
    pub initiator: Option<String>,
    pub origin: Option<Origin>,
    pub topic: Option<String>,
    pub document_type: Option<String>,
    /// Status text reported by the government source
    pub government_status: Option<String>,
    pub parliamentary_term: Option<u32>,
    /// Explicit withdrawal reported by either source
    pub withdrawal_signaled: bool,
    pub creation_date: Option<NaiveDate>,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Proposal {
    pub fn new(id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            government_source_id: None,
            parliamentary_source_id: None,
            registry_number: None,
            print_number: None,
            publication_id: None,
            title: String::new(),
            initiator: None,
            origin: None,
            topic: None,
            document_type: None,
            government_status: None,
            parliamentary_term: None,
            withdrawal_signaled: false,
            creation_date: None,
            phase: Phase::GovernmentStage,
            created_at,
            last_modified: created_at,
        }
    }
}

/// Everything stored for one proposal; the unit of exclusive reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRecord {
    pub proposal: Proposal,
    pub government_stages: BTreeMap<u8, GovernmentStage>,
    pub parliamentary_stages: BTreeMap<StageSeq, ParliamentaryStage>,
    pub voting: Option<Voting>,
    pub senate_position: Option<SenatePosition>,
    pub presidential_action: Option<PresidentialAction>,
    pub publication: Option<PublicationRecord>,
    pub developments: Vec<Development>,
}

impl ProposalRecord {
    pub fn new(id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            proposal: Proposal::new(id, created_at),
            government_stages: BTreeMap::new(),
            parliamentary_stages: BTreeMap::new(),
            voting: None,
            senate_position: None,
            presidential_action: None,
            publication: None,
            developments: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.proposal.id
    }

    pub fn active_government_stage(&self) -> Option<&GovernmentStage> {
        self.government_stages.values().find(|s| s.active)
    }

    /// Most advanced stage name, used for listings
    pub fn latest_stage_name(&self) -> Option<&str> {
        self.parliamentary_stages
            .values()
            .next_back()
            .map(|s| s.name.as_str())
            .or_else(|| self.active_government_stage().map(|s| s.name.as_str()))
            .or_else(|| self.government_stages.values().next_back().map(|s| s.name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phase_round_trips_through_str() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("senate".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_precedence_orders_forward_states() {
        assert!(Phase::GovernmentStage.precedence() < Phase::ParliamentaryStage.precedence());
        assert!(Phase::HeadOfStateStage.precedence() < Phase::Published.precedence());
        assert_eq!(Phase::Rejected.precedence(), None);
        assert!(Phase::Withdrawn.is_terminal());
        assert!(!Phase::UpperHouseStage.is_terminal());
    }

    #[test]
    fn test_stage_seq_between_neighbours() {
        let third = StageSeq::whole(3);
        let fourth = StageSeq::whole(4);
        let mid = StageSeq::between(Some(third), fourth).unwrap();
        assert!(third < mid && mid < fourth);
        assert_eq!(f64::from(mid), 3.5);
        assert_eq!(mid.to_string(), "3.5");

        let tight = StageSeq::from_ticks(3_001);
        assert_eq!(StageSeq::between(Some(third), tight), None);
    }

    #[test]
    fn test_stage_seq_next_after_skips_fractions() {
        assert_eq!(StageSeq::next_after(None), StageSeq::whole(1));
        assert_eq!(StageSeq::next_after(Some(StageSeq::from_ticks(3_500))), StageSeq::whole(4));
    }

    #[test]
    fn test_stage_type_parse_is_total() {
        assert_eq!(ParliamentaryStageType::parse("FirstReading"), ParliamentaryStageType::Reading);
        assert_eq!(ParliamentaryStageType::parse("committee_work"), ParliamentaryStageType::CommitteeWork);
        assert_eq!(ParliamentaryStageType::parse("ToPresident"), ParliamentaryStageType::ReferralToHeadOfState);
        assert_eq!(ParliamentaryStageType::parse("ToConstitutionalTribunal"), ParliamentaryStageType::Unknown);
        assert_eq!(ParliamentaryStageType::parse(""), ParliamentaryStageType::Unknown);
    }

    #[test]
    fn test_origin_from_initiator() {
        assert_eq!(Origin::from_initiator("Minister Zdrowia"), Some(Origin::Government));
        assert_eq!(Origin::from_initiator("Poselski projekt ustawy"), Some(Origin::Deputies));
        assert_eq!(Origin::from_initiator("Prezydent RP"), Some(Origin::President));
        assert_eq!(Origin::from_initiator("Senat"), Some(Origin::Senate));
        assert_eq!(Origin::from_initiator("unknown body"), None);
    }
}
