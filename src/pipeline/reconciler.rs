//! Reconciler
//!
//! Merges one source record into a proposal's working state. Stage upserts
//! only overwrite with newly reported values, parliamentary stages keep the
//! position they were first seen at, and malformed stages are skipped and
//! reported one by one.

use crate::error::SyncIssue;
use crate::models::sources::{
    GovernmentRecord, GovernmentStageInput, Lenient, ParliamentaryRecord, ParliamentaryStageInput,
    SourceKind,
};
use crate::pipeline::voting;
use crate::proposal::{
    fold_text, GovernmentStage, ParliamentaryStage, ParliamentaryStageType, PresidentialAction,
    ProposalRecord, PublicationRecord, SenatePosition, SenateStance, StageSeq, VoteTally,
};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use uuid::Uuid;
use validator::Validate;

/// Side information produced by one merge
#[derive(Debug)]
pub struct MergeOutcome {
    source_kind: SourceKind,
    source_id: String,
    proposal_id: Uuid,
    pub issues: Vec<SyncIssue>,
    /// A stage tally was added or changed
    pub tally_touched: bool,
    /// A government stage became the active one
    pub activated_government_stage: bool,
}

impl MergeOutcome {
    fn new(source_kind: SourceKind, source_id: &str, proposal_id: Uuid) -> Self {
        Self {
            source_kind,
            source_id: source_id.to_string(),
            proposal_id,
            issues: Vec::new(),
            tally_touched: false,
            activated_government_stage: false,
        }
    }

    fn invalid(&mut self, item: String, reason: impl Into<String>) {
        self.issues.push(SyncIssue::Validation {
            source_kind: self.source_kind,
            source_id: self.source_id.clone(),
            proposal_id: Some(self.proposal_id),
            item,
            reason: reason.into(),
        });
    }

    fn amendment_rejected(&mut self, record: &str, detail: String) {
        self.issues.push(SyncIssue::AmendmentRejected {
            proposal_id: self.proposal_id,
            record: record.to_string(),
            detail,
        });
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Overwrite with a newly reported, non-empty value
fn overwrite_text(slot: &mut Option<String>, incoming: Option<&str>) {
    if let Some(value) = clean(incoming) {
        if slot.as_deref() != Some(value) {
            *slot = Some(value.to_string());
        }
    }
}

fn overwrite<T: Copy + PartialEq>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() && *slot != incoming {
        *slot = incoming;
    }
}

fn fill_text(slot: &mut Option<String>, incoming: Option<&str>) {
    if slot.is_none() {
        *slot = clean(incoming).map(str::to_string);
    }
}

/// Fill-only merge of one sub-record field; a differing value is a conflict
fn fill_field<T: Clone + PartialEq + Debug>(
    field: &str,
    current: &Option<T>,
    incoming: &Option<T>,
    filled: &mut bool,
) -> Result<Option<T>, String> {
    match (current, incoming) {
        (Some(c), Some(i)) if c != i => Err(format!("{} changed from {:?} to {:?}", field, c, i)),
        (None, Some(i)) => {
            *filled = true;
            Ok(Some(i.clone()))
        }
        (c, _) => Ok(c.clone()),
    }
}

enum Amend<T> {
    Unchanged,
    Replace(T),
    Conflict(String),
}

/// Apply the single permitted amendment rule to a sub-record
fn amend<T>(
    current: &Option<T>,
    incoming: T,
    amended: impl Fn(&T) -> bool,
    merge: impl Fn(&T, &T, &mut bool) -> Result<T, String>,
) -> Amend<T> {
    let Some(current) = current else {
        return Amend::Replace(incoming);
    };
    let mut filled = false;
    match merge(current, &incoming, &mut filled) {
        Err(detail) => Amend::Conflict(detail),
        Ok(_) if !filled => Amend::Unchanged,
        Ok(_) if amended(current) => {
            Amend::Conflict("the single permitted amendment was already used".to_string())
        }
        Ok(merged) => Amend::Replace(merged),
    }
}

fn stage_label(source: &str, seq: Option<String>) -> String {
    match seq {
        Some(seq) => format!("{} stage {}", source, seq),
        None => format!("{} stage", source),
    }
}

// =============================================================================
// GOVERNMENT SOURCE
// =============================================================================

pub fn merge_government(record: &mut ProposalRecord, input: &GovernmentRecord) -> MergeOutcome {
    let mut outcome = MergeOutcome::new(SourceKind::Government, &input.source_id, record.id());

    let p = &mut record.proposal;
    if let Some(title) = clean(Some(input.title.as_str())) {
        if p.title != title {
            p.title = title.to_string();
        }
    }
    overwrite_text(&mut p.initiator, input.initiator.as_deref());
    overwrite(&mut p.creation_date, input.creation_date);
    overwrite_text(&mut p.government_status, input.status.as_deref());
    overwrite_text(&mut p.topic, input.topic.as_deref());
    overwrite_text(&mut p.document_type, input.document_type.as_deref());
    if input.withdrawn && !p.withdrawal_signaled {
        p.withdrawal_signaled = true;
    }

    let mut valid: Vec<&GovernmentStageInput> = Vec::new();
    for stage in &input.stages {
        let stage = match stage {
            Lenient::Parsed(stage) => stage,
            Lenient::Invalid(item) => {
                outcome.invalid(stage_label("government", item.field("seq")), item.reason.clone());
                continue;
            }
        };
        if let Err(e) = stage.validate() {
            outcome.invalid(format!("government stage {}", stage.seq), e.to_string());
        } else if valid.iter().any(|v| v.seq == stage.seq) {
            outcome.invalid(format!("government stage {}", stage.seq), "sequence reported twice");
        } else {
            valid.push(stage);
        }
    }

    // At most one active stage: the highest claim wins, the rest are malformed
    let active_top = valid.iter().filter(|s| s.active).map(|s| s.seq).max();
    let mut kept = Vec::with_capacity(valid.len());
    for stage in valid {
        if stage.active && Some(stage.seq) != active_top {
            outcome.invalid(
                format!("government stage {}", stage.seq),
                "more than one stage reported active",
            );
        } else {
            kept.push(stage);
        }
    }

    let was_active = active_top
        .and_then(|top| record.government_stages.get(&top))
        .is_some_and(|s| s.active);

    for stage in kept {
        match record.government_stages.get_mut(&stage.seq) {
            Some(existing) => {
                let name = stage.name.trim();
                if existing.name != name {
                    existing.name = name.to_string();
                }
                if existing.active != stage.active {
                    existing.active = stage.active;
                }
                overwrite(&mut existing.start_date, stage.start_date);
                overwrite(&mut existing.last_modified, stage.last_modified);
                overwrite_text(&mut existing.catalog_id, stage.catalog_id.as_deref());
            }
            None => {
                record.government_stages.insert(
                    stage.seq,
                    GovernmentStage {
                        seq: stage.seq,
                        name: stage.name.trim().to_string(),
                        active: stage.active,
                        start_date: stage.start_date,
                        last_modified: stage.last_modified,
                        catalog_id: clean(stage.catalog_id.as_deref()).map(str::to_string),
                    },
                );
            }
        }
    }

    if let Some(top) = active_top {
        for (seq, stage) in record.government_stages.iter_mut() {
            if *seq != top && stage.active {
                stage.active = false;
            }
        }
        outcome.activated_government_stage = !was_active;
    }

    outcome
}

// =============================================================================
// PARLIAMENTARY SOURCE
// =============================================================================

/// Identity of a parliamentary stage within one proposal
type StageKey = (String, String, usize);

fn type_key(stage_type: ParliamentaryStageType, raw: &str) -> String {
    match stage_type {
        ParliamentaryStageType::Unknown => format!("unknown:{}", fold_text(raw.trim())),
        known => known.as_str().to_string(),
    }
}

fn name_key(name: &str) -> String {
    fold_text(name).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attach an occurrence index so repeated (type, name) pairs stay distinct
fn keyed(stages: impl Iterator<Item = (String, String)>) -> Vec<StageKey> {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    stages
        .map(|(t, n)| {
            let count = seen.entry((t.clone(), n.clone())).or_default();
            *count += 1;
            (t, n, *count)
        })
        .collect()
}

pub fn merge_parliamentary(record: &mut ProposalRecord, input: &ParliamentaryRecord) -> MergeOutcome {
    let mut outcome = MergeOutcome::new(SourceKind::Parliamentary, &input.source_id, record.id());

    let p = &mut record.proposal;
    overwrite_text(&mut p.print_number, input.print_number.as_deref());
    if p.title.is_empty() {
        if let Some(title) = clean(input.title.as_deref()) {
            p.title = title.to_string();
        }
    }
    fill_text(&mut p.initiator, input.initiator.as_deref());
    overwrite(&mut p.parliamentary_term, input.term);
    if input.withdrawn && !p.withdrawal_signaled {
        p.withdrawal_signaled = true;
    }

    // Validate stage by stage; one bad stage never rejects the batch
    let mut incoming: Vec<(&ParliamentaryStageInput, Option<VoteTally>)> = Vec::new();
    for stage in &input.stages {
        let stage = match stage {
            Lenient::Parsed(stage) => stage,
            Lenient::Invalid(item) => {
                outcome.invalid(stage_label("parliamentary", item.field("seq")), item.reason.clone());
                continue;
            }
        };
        let item = format!("parliamentary stage {}", stage.seq);
        if let Err(e) = stage.validate() {
            outcome.invalid(item, e.to_string());
            continue;
        }
        if incoming.iter().any(|(s, _)| s.seq == stage.seq) {
            outcome.invalid(item, "sequence reported twice");
            continue;
        }
        match voting::tally_from_input(stage) {
            Ok(tally) => incoming.push((stage, tally)),
            Err(reason) => outcome.invalid(item, reason),
        }
    }
    incoming.sort_by_key(|(s, _)| s.seq);

    let stored_keys = keyed(record.parliamentary_stages.values().map(|s| {
        (type_key(s.stage_type, &s.source_type), name_key(&s.name))
    }));
    let stored_by_key: HashMap<StageKey, StageSeq> = stored_keys
        .into_iter()
        .zip(record.parliamentary_stages.keys().copied())
        .collect();
    let incoming_keys = keyed(incoming.iter().map(|(s, _)| {
        let stage_type = ParliamentaryStageType::parse(&s.stage_type);
        (type_key(stage_type, &s.stage_type), name_key(&s.name))
    }));
    let mut matches: Vec<Option<StageSeq>> = incoming_keys
        .iter()
        .map(|k| stored_by_key.get(k).copied())
        .collect();

    // A stage renamed at the same source position is the same stage, unless
    // its stored name is still reported elsewhere in this record
    let reported: HashSet<(&str, &str)> = incoming_keys
        .iter()
        .map(|(t, n, _)| (t.as_str(), n.as_str()))
        .collect();
    let claimed: HashSet<StageSeq> = matches.iter().flatten().copied().collect();
    let renamed: HashMap<(u32, String), StageSeq> = record
        .parliamentary_stages
        .values()
        .filter(|s| !claimed.contains(&s.seq))
        .filter_map(|s| {
            let t = type_key(s.stage_type, &s.source_type);
            let n = name_key(&s.name);
            if reported.contains(&(t.as_str(), n.as_str())) {
                return None;
            }
            s.source_seq.map(|source_seq| ((source_seq, t), s.seq))
        })
        .collect();
    for (i, (stage, _)) in incoming.iter().enumerate() {
        if matches[i].is_none() {
            let key = (stage.seq, incoming_keys[i].0.clone());
            matches[i] = renamed.get(&key).copied();
        }
    }

    for (i, (stage, tally)) in incoming.into_iter().enumerate() {
        if let Some(seq) = matches[i] {
            if let Some(existing) = record.parliamentary_stages.get_mut(&seq) {
                outcome.tally_touched |= update_stage(existing, stage, tally);
            }
            continue;
        }

        // Slot a newly discovered stage before the next stage we already know
        let upper = matches[i + 1..].iter().flatten().next().copied();
        let seq = match upper {
            None => StageSeq::next_after(record.parliamentary_stages.keys().next_back().copied()),
            Some(upper) => {
                let lower = record
                    .parliamentary_stages
                    .range(..upper)
                    .next_back()
                    .map(|(k, _)| *k);
                match StageSeq::between(lower, upper) {
                    Some(seq) => seq,
                    None => {
                        outcome.invalid(
                            format!("parliamentary stage {}", stage.seq),
                            "sequence space exhausted; resequence the proposal",
                        );
                        continue;
                    }
                }
            }
        };

        outcome.tally_touched |= tally.is_some();
        let stage_type = ParliamentaryStageType::parse(&stage.stage_type);
        record.parliamentary_stages.insert(
            seq,
            ParliamentaryStage {
                seq,
                source_seq: Some(stage.seq),
                stage_type,
                source_type: stage.stage_type.trim().to_string(),
                name: stage.name.trim().to_string(),
                date: stage.date,
                decision: clean(stage.decision.as_deref()).map(str::to_string),
                print_number: clean(stage.print_number.as_deref()).map(str::to_string),
                committee_code: clean(stage.committee_code.as_deref()).map(str::to_string),
                rapporteur: clean(stage.rapporteur.as_deref()).map(str::to_string),
                tally,
            },
        );
    }

    merge_sub_records(record, input, &mut outcome);
    outcome
}

/// Non-null overwrite of a stored stage; returns whether its tally changed
fn update_stage(
    existing: &mut ParliamentaryStage,
    stage: &ParliamentaryStageInput,
    tally: Option<VoteTally>,
) -> bool {
    let name = stage.name.trim();
    if !name.is_empty() && existing.name != name {
        existing.name = name.to_string();
    }
    overwrite(&mut existing.source_seq, Some(stage.seq));
    overwrite(&mut existing.date, stage.date);
    overwrite_text(&mut existing.decision, stage.decision.as_deref());
    overwrite_text(&mut existing.print_number, stage.print_number.as_deref());
    overwrite_text(&mut existing.committee_code, stage.committee_code.as_deref());
    overwrite_text(&mut existing.rapporteur, stage.rapporteur.as_deref());
    match tally {
        Some(t) if existing.tally.as_ref() != Some(&t) => {
            existing.tally = Some(t);
            true
        }
        _ => false,
    }
}

fn merge_sub_records(
    record: &mut ProposalRecord,
    input: &ParliamentaryRecord,
    outcome: &mut MergeOutcome,
) {
    if let Some(senate) = &input.senate_position {
        let position = senate.position.trim();
        if position.is_empty() {
            outcome.invalid("senate position".to_string(), "position text is required");
        } else {
            let incoming = SenatePosition {
                date: senate.date,
                stance: SenateStance::parse(position),
                position: position.to_string(),
                print_number: clean(senate.print_number.as_deref()).map(str::to_string),
                decision: clean(senate.decision.as_deref()).map(str::to_string),
                amended: false,
            };
            let result = amend(
                &record.senate_position,
                incoming,
                |c| c.amended,
                |c, i, filled| {
                    if c.position != i.position {
                        return Err(format!("position changed from '{}' to '{}'", c.position, i.position));
                    }
                    Ok(SenatePosition {
                        date: fill_field("date", &c.date, &i.date, filled)?,
                        stance: c.stance,
                        position: c.position.clone(),
                        print_number: fill_field("printNumber", &c.print_number, &i.print_number, filled)?,
                        decision: fill_field("decision", &c.decision, &i.decision, filled)?,
                        amended: true,
                    })
                },
            );
            apply_amend(&mut record.senate_position, result, "senate position", outcome);
        }
    }

    if input.presidential_signature_date.is_some() || input.presidential_veto_date.is_some() {
        let incoming = PresidentialAction {
            signature_date: input.presidential_signature_date,
            veto_date: input.presidential_veto_date,
            amended: false,
        };
        let result = amend(
            &record.presidential_action,
            incoming,
            |c| c.amended,
            |c, i, filled| {
                Ok(PresidentialAction {
                    signature_date: fill_field("signatureDate", &c.signature_date, &i.signature_date, filled)?,
                    veto_date: fill_field("vetoDate", &c.veto_date, &i.veto_date, filled)?,
                    amended: true,
                })
            },
        );
        apply_amend(&mut record.presidential_action, result, "presidential action", outcome);
    }

    match clean(input.publication_ref.as_deref()) {
        Some(reference) => {
            let incoming = PublicationRecord {
                reference: reference.to_string(),
                date: input.publication_date,
                amended: false,
            };
            let result = amend(
                &record.publication,
                incoming,
                |c| c.amended,
                |c, i, filled| {
                    if c.reference != i.reference {
                        return Err(format!("reference changed from '{}' to '{}'", c.reference, i.reference));
                    }
                    Ok(PublicationRecord {
                        reference: c.reference.clone(),
                        date: fill_field("date", &c.date, &i.date, filled)?,
                        amended: true,
                    })
                },
            );
            apply_amend(&mut record.publication, result, "publication record", outcome);
        }
        None if input.publication_date.is_some() => {
            outcome.invalid("publication record".to_string(), "publicationDate without publicationRef");
        }
        None => {}
    }

    if let Some(publication) = &record.publication {
        if record.proposal.publication_id.as_deref() != Some(publication.reference.as_str()) {
            record.proposal.publication_id = Some(publication.reference.clone());
        }
    }
}

fn apply_amend<T>(slot: &mut Option<T>, result: Amend<T>, name: &str, outcome: &mut MergeOutcome) {
    match result {
        Amend::Unchanged => {}
        Amend::Replace(value) => *slot = Some(value),
        Amend::Conflict(detail) => outcome.amendment_rejected(name, detail),
    }
}

/// Renumber parliamentary stages to whole positions, preserving order
pub fn resequence(record: &mut ProposalRecord) -> bool {
    let stages = std::mem::take(&mut record.parliamentary_stages);
    let mut remap = HashMap::with_capacity(stages.len());
    for (position, (old, mut stage)) in (1u32..).zip(stages) {
        let new = StageSeq::whole(position);
        remap.insert(old, new);
        stage.seq = new;
        record.parliamentary_stages.insert(new, stage);
    }
    if let Some(voting) = record.voting.as_mut() {
        if let Some(new) = remap.get(&voting.source_stage) {
            voting.source_stage = *new;
        }
    }
    remap.iter().any(|(old, new)| old != new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sources::SenatePositionInput;
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;

    fn date(day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 6, day)
    }

    fn gov_stage(seq: u8, active: bool) -> GovernmentStageInput {
        GovernmentStageInput {
            seq,
            name: format!("Etap {}", seq),
            active,
            start_date: date(u32::from(seq)),
            last_modified: None,
            catalog_id: None,
        }
    }

    fn gov_record(stages: Vec<GovernmentStageInput>) -> GovernmentRecord {
        GovernmentRecord {
            source_id: "12345".to_string(),
            registry_ref: Some("RM-0610-136-25".to_string()),
            title: "Projekt ustawy o zdrowiu".to_string(),
            initiator: Some("Minister Zdrowia".to_string()),
            creation_date: date(1),
            status: None,
            withdrawn: false,
            topic: None,
            document_type: None,
            stages: stages.into_iter().map(Lenient::from).collect(),
        }
    }

    fn parl_stage(seq: u32, stage_type: &str, name: &str) -> ParliamentaryStageInput {
        ParliamentaryStageInput {
            seq,
            stage_type: stage_type.to_string(),
            name: name.to_string(),
            date: date(seq),
            decision: None,
            print_number: None,
            voting_yes: None,
            voting_no: None,
            voting_abstain: None,
            voting_total: None,
            voting_date: None,
            sitting: None,
            voting_number: None,
            voting_by_party: None,
            committee_code: None,
            rapporteur: None,
        }
    }

    fn parl_record(stages: Vec<ParliamentaryStageInput>) -> ParliamentaryRecord {
        ParliamentaryRecord {
            source_id: "10/1604".to_string(),
            registry_ref: Some("RM-0610-136-25".to_string()),
            print_number: Some("1604".to_string()),
            title: None,
            initiator: None,
            term: Some(10),
            withdrawn: false,
            stages: stages.into_iter().map(Lenient::from).collect(),
            senate_position: None,
            presidential_signature_date: None,
            presidential_veto_date: None,
            publication_ref: None,
            publication_date: None,
        }
    }

    fn fresh() -> ProposalRecord {
        ProposalRecord::new(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_government_merge_is_idempotent() {
        let mut record = fresh();
        let input = gov_record((1..=5).map(|s| gov_stage(s, s == 5)).collect());
        let first = merge_government(&mut record, &input);
        assert!(first.issues.is_empty());
        assert!(first.activated_government_stage);
        assert_eq!(record.active_government_stage().map(|s| s.seq), Some(5));

        let snapshot = record.clone();
        let second = merge_government(&mut record, &input);
        assert!(!second.activated_government_stage);
        assert_eq!(record, snapshot);
    }

    #[test]
    fn test_null_fields_do_not_erase_stored_values() {
        let mut record = fresh();
        merge_government(&mut record, &gov_record(vec![gov_stage(1, true)]));
        let mut sparse = gov_stage(1, true);
        sparse.start_date = None;
        merge_government(&mut record, &gov_record(vec![sparse]));
        assert_eq!(record.government_stages[&1].start_date, date(1));
    }

    #[test]
    fn test_multiple_active_claims_keep_the_highest() {
        let mut record = fresh();
        let outcome = merge_government(
            &mut record,
            &gov_record(vec![gov_stage(2, true), gov_stage(3, false), gov_stage(4, true)]),
        );
        assert_eq!(outcome.issues.len(), 1);
        assert!(!record.government_stages.contains_key(&2));
        assert_eq!(record.active_government_stage().map(|s| s.seq), Some(4));
    }

    #[test]
    fn test_new_active_stage_clears_previous() {
        let mut record = fresh();
        merge_government(&mut record, &gov_record(vec![gov_stage(4, true)]));
        merge_government(&mut record, &gov_record(vec![gov_stage(5, true)]));
        let active: Vec<u8> = record
            .government_stages
            .values()
            .filter(|s| s.active)
            .map(|s| s.seq)
            .collect();
        assert_eq!(active, vec![5]);
    }

    #[test]
    fn test_missed_stage_is_slotted_between_neighbours() {
        let mut record = fresh();
        merge_parliamentary(
            &mut record,
            &parl_record(vec![
                parl_stage(1, "Start", "Wpłynięcie projektu"),
                parl_stage(2, "Referral", "Skierowanie do I czytania"),
                parl_stage(3, "FirstReading", "I czytanie w komisjach"),
            ]),
        );

        // The source now reports a committee stage it skipped earlier
        merge_parliamentary(
            &mut record,
            &parl_record(vec![
                parl_stage(1, "Start", "Wpłynięcie projektu"),
                parl_stage(2, "CommitteeReport", "Praca w komisjach"),
                parl_stage(3, "Referral", "Skierowanie do I czytania"),
                parl_stage(4, "FirstReading", "I czytanie w komisjach"),
            ]),
        );

        let positions: Vec<(String, String)> = record
            .parliamentary_stages
            .values()
            .map(|s| (s.seq.to_string(), s.name.clone()))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("1".to_string(), "Wpłynięcie projektu".to_string()),
                ("1.5".to_string(), "Praca w komisjach".to_string()),
                ("2".to_string(), "Skierowanie do I czytania".to_string()),
                ("3".to_string(), "I czytanie w komisjach".to_string()),
            ]
        );

        assert!(resequence(&mut record));
        let whole: Vec<String> = record.parliamentary_stages.keys().map(|s| s.to_string()).collect();
        assert_eq!(whole, vec!["1", "2", "3", "4"]);
        assert!(!resequence(&mut record));
    }

    #[test]
    fn test_renamed_stage_at_same_position_is_updated_in_place() {
        let mut record = fresh();
        merge_parliamentary(&mut record, &parl_record(vec![parl_stage(1, "Reading", "I czytanie")]));
        let mut renamed = parl_stage(1, "Reading", "I czytanie na posiedzeniu Sejmu");
        renamed.decision = Some("skierowano do komisji".to_string());
        let outcome = merge_parliamentary(&mut record, &parl_record(vec![renamed]));
        assert!(outcome.issues.is_empty());

        let stages: Vec<(String, Option<u32>, String)> = record
            .parliamentary_stages
            .values()
            .map(|s| (s.seq.to_string(), s.source_seq, s.name.clone()))
            .collect();
        assert_eq!(
            stages,
            vec![("1".to_string(), Some(1), "I czytanie na posiedzeniu Sejmu".to_string())]
        );
        assert_eq!(
            record.parliamentary_stages.values().next().and_then(|s| s.decision.as_deref()),
            Some("skierowano do komisji")
        );
    }

    #[test]
    fn test_shifted_stage_of_same_type_is_not_renamed() {
        let mut record = fresh();
        merge_parliamentary(
            &mut record,
            &parl_record(vec![
                parl_stage(1, "Reading", "I czytanie"),
                parl_stage(2, "Reading", "II czytanie"),
            ]),
        );
        merge_parliamentary(
            &mut record,
            &parl_record(vec![
                parl_stage(1, "Reading", "I czytanie"),
                parl_stage(2, "Reading", "Drugie czytanie w komisji"),
                parl_stage(3, "Reading", "II czytanie"),
            ]),
        );
        let names: Vec<String> = record.parliamentary_stages.values().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["I czytanie", "Drugie czytanie w komisji", "II czytanie"]);
    }

    #[test]
    fn test_unparseable_stage_is_reported_with_its_position() {
        let mut record = fresh();
        let mut input = parl_record(vec![parl_stage(2, "Reading", "II czytanie")]);
        input.stages.insert(
            0,
            Lenient::Invalid(crate::models::sources::InvalidItem {
                raw: serde_json::json!({"seq": 1, "type": "Reading", "name": "I czytanie", "date": "31-13-2025"}),
                reason: "unrecognized date '31-13-2025'".to_string(),
            }),
        );
        let outcome = merge_parliamentary(&mut record, &input);
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(
            &outcome.issues[0],
            SyncIssue::Validation { item, .. } if item == "parliamentary stage 1"
        ));
        assert_eq!(record.parliamentary_stages.len(), 1);
    }

    #[test]
    fn test_malformed_stage_is_skipped_alone() {
        let mut record = fresh();
        let mut bad = parl_stage(2, "Voting", "Głosowanie");
        bad.voting_yes = Some(300);
        bad.voting_no = Some(200);
        bad.voting_abstain = Some(10);
        bad.voting_total = Some(460);
        let outcome = merge_parliamentary(
            &mut record,
            &parl_record(vec![parl_stage(1, "Start", "Wpłynięcie"), bad, parl_stage(3, "Referral", "Skierowanie")]),
        );
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(record.parliamentary_stages.len(), 2);
        assert!(!outcome.tally_touched);
    }

    #[test]
    fn test_sub_record_allows_one_fill_only_amendment() {
        let mut record = fresh();
        let mut input = parl_record(vec![]);
        input.senate_position = Some(SenatePositionInput {
            date: date(20),
            position: "wniósł poprawki".to_string(),
            print_number: None,
            decision: None,
        });
        merge_parliamentary(&mut record, &input);
        assert_eq!(record.senate_position.as_ref().map(|s| s.stance), Some(SenateStance::WithAmendments));

        // Fill the lower-house decision once
        if let Some(senate) = input.senate_position.as_mut() {
            senate.decision = Some("przyjęto poprawki".to_string());
        }
        let outcome = merge_parliamentary(&mut record, &input);
        assert!(outcome.issues.is_empty());
        assert!(record.senate_position.as_ref().unwrap().amended);

        // A second fill is refused
        if let Some(senate) = input.senate_position.as_mut() {
            senate.print_number = Some("1650".to_string());
        }
        let outcome = merge_parliamentary(&mut record, &input);
        assert_eq!(outcome.issues[0].kind(), "amendment_rejected");
        assert_eq!(record.senate_position.as_ref().unwrap().print_number, None);

        // Changing a recorded value is refused too
        input.publication_ref = Some("Dz.U. 2025 poz. 1".to_string());
        merge_parliamentary(&mut record, &input);
        input.publication_ref = Some("Dz.U. 2025 poz. 2".to_string());
        let outcome = merge_parliamentary(&mut record, &input);
        assert!(outcome.issues.iter().any(|i| i.kind() == "amendment_rejected"));
        assert_eq!(record.proposal.publication_id.as_deref(), Some("Dz.U. 2025 poz. 1"));
    }
}
