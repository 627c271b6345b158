//! Proposal repository
//!
//! Writes one proposal's complete reconciled state inside a single
//! transaction and loads everything back at startup.

use crate::error::AppError;
use crate::models::sources::SourceKind;
use crate::proposal::{
    Classification, Development, DominantVote, GovernmentStage, Origin, ParliamentaryStage,
    ParliamentaryStageType, Phase, PresidentialAction, Proposal, ProposalRecord,
    PublicationRecord, SenatePosition, SenateStance, StageSeq, SyncRun, SyncRunStatus, VoteTally,
    Voting, VotingByParty, VotingResult,
};
use deadpool_postgres::{Pool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tokio_postgres::types::Json;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

fn count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn opt_count(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn parse_column<T: FromStr<Err = String>>(raw: &str) -> Result<T, AppError> {
    raw.parse().map_err(AppError::Internal)
}

fn stance_str(stance: SenateStance) -> &'static str {
    match stance {
        SenateStance::WithoutAmendments => "without_amendments",
        SenateStance::WithAmendments => "with_amendments",
        SenateStance::Rejected => "rejected",
        SenateStance::Other => "other",
    }
}

fn stance_from(raw: &str) -> SenateStance {
    match raw {
        "without_amendments" => SenateStance::WithoutAmendments,
        "with_amendments" => SenateStance::WithAmendments,
        "rejected" => SenateStance::Rejected,
        _ => SenateStance::Other,
    }
}

fn stage_type_from(raw: &str) -> ParliamentaryStageType {
    match raw {
        "intake" => ParliamentaryStageType::Intake,
        "reading" => ParliamentaryStageType::Reading,
        "committee_work" => ParliamentaryStageType::CommitteeWork,
        "senate_position" => ParliamentaryStageType::SenatePosition,
        "referral_to_head_of_state" => ParliamentaryStageType::ReferralToHeadOfState,
        "signature" => ParliamentaryStageType::Signature,
        "conclusion" => ParliamentaryStageType::Conclusion,
        _ => ParliamentaryStageType::Unknown,
    }
}

/// Runs loaded back at startup
const RUN_HISTORY: i64 = 200;

fn source_kind_from(raw: &str) -> Result<SourceKind, AppError> {
    match raw {
        "government" => Ok(SourceKind::Government),
        "parliamentary" => Ok(SourceKind::Parliamentary),
        other => Err(AppError::Internal(format!("Unknown source kind '{}'", other))),
    }
}

fn run_from_row(row: &Row) -> Result<SyncRun, AppError> {
    let status: &str = row.get("status");
    Ok(SyncRun {
        run_id: row.get("run_id"),
        source_kind: source_kind_from(row.get("source_kind"))?,
        status: SyncRunStatus::parse(status)
            .ok_or_else(|| AppError::Internal(format!("Unknown sync run status '{}'", status)))?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        received: count(row.get("received")),
        linked: count(row.get("linked")),
        created: count(row.get("created")),
        updated: count(row.get("updated")),
        failed: count(row.get("failed")),
        developments: count(row.get("developments")),
        issues: count(row.get("issues")),
        error: row.get("error_message"),
    })
}

/// PostgreSQL-backed persistence for reconciled proposals
#[derive(Clone)]
pub struct ProposalRepository {
    pool: Pool,
}

impl ProposalRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Persist a proposal's full state; nothing is written unless all of it is
    pub async fn save(&self, record: &ProposalRecord) -> Result<(), AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        save_proposal(&tx, &record.proposal).await?;

        let id = record.id();
        tx.execute("DELETE FROM government_stages WHERE proposal_id = $1", &[&id])
            .await?;
        for s in record.government_stages.values() {
            tx.execute(
                "INSERT INTO government_stages
                    (proposal_id, seq, name, active, start_date, last_modified, catalog_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[&id, &i16::from(s.seq), &s.name, &s.active, &s.start_date, &s.last_modified, &s.catalog_id],
            )
            .await?;
        }

        tx.execute("DELETE FROM parliamentary_stages WHERE proposal_id = $1", &[&id])
            .await?;
        for s in record.parliamentary_stages.values() {
            tx.execute(
                "INSERT INTO parliamentary_stages
                    (proposal_id, seq, source_seq, stage_type, source_type, name, stage_date,
                     decision, print_number, committee_code, rapporteur, tally)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &id,
                    &i64::from(s.seq.ticks()),
                    &s.source_seq.map(i64::from),
                    &s.stage_type.as_str(),
                    &s.source_type,
                    &s.name,
                    &s.date,
                    &s.decision,
                    &s.print_number,
                    &s.committee_code,
                    &s.rapporteur,
                    &s.tally.as_ref().map(Json),
                ],
            )
            .await?;
        }

        save_voting(&tx, id, record.voting.as_ref()).await?;
        save_sub_records(&tx, record).await?;

        for d in &record.developments {
            tx.execute(
                "INSERT INTO developments
                    (id, proposal_id, title, classification, prior_phase, new_phase, occurred_at, recorded_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (proposal_id, prior_phase, new_phase) DO NOTHING",
                &[
                    &d.id,
                    &id,
                    &d.title,
                    &d.classification.as_str(),
                    &d.prior_phase.as_str(),
                    &d.new_phase.as_str(),
                    &d.occurred_at,
                    &d.recorded_at,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        debug!("Persisted proposal {}", id);
        Ok(())
    }

    /// Load every stored proposal with its collections
    pub async fn load_all(&self) -> Result<Vec<ProposalRecord>, AppError> {
        let client = self.pool.get().await?;
        let mut records: HashMap<Uuid, ProposalRecord> = HashMap::new();

        for row in client.query("SELECT * FROM proposals", &[]).await? {
            let proposal = proposal_from_row(&row)?;
            let mut record = ProposalRecord::new(proposal.id, proposal.created_at);
            record.proposal = proposal;
            records.insert(record.id(), record);
        }

        for row in client.query("SELECT * FROM government_stages", &[]).await? {
            let id: Uuid = row.get("proposal_id");
            let seq = u8::try_from(row.get::<_, i16>("seq")).unwrap_or(0);
            if let Some(record) = records.get_mut(&id) {
                record.government_stages.insert(
                    seq,
                    GovernmentStage {
                        seq,
                        name: row.get("name"),
                        active: row.get("active"),
                        start_date: row.get("start_date"),
                        last_modified: row.get("last_modified"),
                        catalog_id: row.get("catalog_id"),
                    },
                );
            }
        }

        for row in client.query("SELECT * FROM parliamentary_stages", &[]).await? {
            let id: Uuid = row.get("proposal_id");
            let seq = StageSeq::from_ticks(count(row.get("seq")));
            let tally: Option<Json<VoteTally>> = row.get("tally");
            if let Some(record) = records.get_mut(&id) {
                record.parliamentary_stages.insert(
                    seq,
                    ParliamentaryStage {
                        seq,
                        source_seq: opt_count(row.get("source_seq")),
                        stage_type: stage_type_from(row.get("stage_type")),
                        source_type: row.get("source_type"),
                        name: row.get("name"),
                        date: row.get("stage_date"),
                        decision: row.get("decision"),
                        print_number: row.get("print_number"),
                        committee_code: row.get("committee_code"),
                        rapporteur: row.get("rapporteur"),
                        tally: tally.map(|t| t.0),
                    },
                );
            }
        }

        let mut voting_owner: HashMap<Uuid, Uuid> = HashMap::new();
        for row in client.query("SELECT * FROM votings", &[]).await? {
            let proposal_id: Uuid = row.get("proposal_id");
            let yes = count(row.get("yes"));
            let no = count(row.get("no"));
            let voting = Voting {
                id: row.get("id"),
                date: row.get("voting_date"),
                yes,
                no,
                abstain: count(row.get("abstain")),
                total: count(row.get("total")),
                result: if row.get::<_, &str>("result") == "passed" {
                    VotingResult::Passed
                } else {
                    VotingResult::Rejected
                },
                sitting: opt_count(row.get("sitting")),
                voting_number: opt_count(row.get("voting_number")),
                source_stage: StageSeq::from_ticks(count(row.get("source_stage"))),
                by_party: Vec::new(),
            };
            voting_owner.insert(voting.id, proposal_id);
            if let Some(record) = records.get_mut(&proposal_id) {
                record.voting = Some(voting);
            }
        }

        for row in client
            .query("SELECT * FROM voting_by_party ORDER BY party", &[])
            .await?
        {
            let voting_id: Uuid = row.get("voting_id");
            let dominant_vote = match row.get::<_, &str>("dominant_vote") {
                "NO" => DominantVote::No,
                "ABSTAIN" => DominantVote::Abstain,
                _ => DominantVote::Yes,
            };
            let voting = voting_owner
                .get(&voting_id)
                .and_then(|pid| records.get_mut(pid))
                .and_then(|r| r.voting.as_mut());
            if let Some(voting) = voting {
                voting.by_party.push(VotingByParty {
                    party: row.get("party"),
                    yes: count(row.get("yes")),
                    no: count(row.get("no")),
                    abstain: count(row.get("abstain")),
                    absent: count(row.get("absent")),
                    dominant_vote,
                });
            }
        }

        for row in client.query("SELECT * FROM senate_positions", &[]).await? {
            let id: Uuid = row.get("proposal_id");
            if let Some(record) = records.get_mut(&id) {
                record.senate_position = Some(SenatePosition {
                    date: row.get("position_date"),
                    stance: stance_from(row.get("stance")),
                    position: row.get("position"),
                    print_number: row.get("print_number"),
                    decision: row.get("decision"),
                    amended: row.get("amended"),
                });
            }
        }

        for row in client.query("SELECT * FROM presidential_actions", &[]).await? {
            let id: Uuid = row.get("proposal_id");
            if let Some(record) = records.get_mut(&id) {
                record.presidential_action = Some(PresidentialAction {
                    signature_date: row.get("signature_date"),
                    veto_date: row.get("veto_date"),
                    amended: row.get("amended"),
                });
            }
        }

        for row in client.query("SELECT * FROM publication_records", &[]).await? {
            let id: Uuid = row.get("proposal_id");
            if let Some(record) = records.get_mut(&id) {
                record.publication = Some(PublicationRecord {
                    reference: row.get("reference"),
                    date: row.get("publication_date"),
                    amended: row.get("amended"),
                });
            }
        }

        for row in client
            .query("SELECT * FROM developments ORDER BY recorded_at, occurred_at", &[])
            .await?
        {
            let id: Uuid = row.get("proposal_id");
            let development = Development {
                id: row.get("id"),
                proposal_id: id,
                title: row.get("title"),
                classification: parse_column::<Classification>(row.get("classification"))?,
                prior_phase: parse_column::<Phase>(row.get("prior_phase"))?,
                new_phase: parse_column::<Phase>(row.get("new_phase"))?,
                occurred_at: row.get("occurred_at"),
                recorded_at: row.get("recorded_at"),
            };
            if let Some(record) = records.get_mut(&id) {
                record.developments.push(development);
            }
        }

        Ok(records.into_values().collect())
    }

    /// Append one finished run to the sync log
    pub async fn save_run(&self, run: &SyncRun) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO sync_runs
                    (run_id, source_kind, status, started_at, finished_at, received, linked,
                     created, updated, failed, developments, issues, error_message)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (run_id) DO NOTHING",
                &[
                    &run.run_id,
                    &run.source_kind.as_str(),
                    &run.status.as_str(),
                    &run.started_at,
                    &run.finished_at,
                    &i64::from(run.received),
                    &i64::from(run.linked),
                    &i64::from(run.created),
                    &i64::from(run.updated),
                    &i64::from(run.failed),
                    &i64::from(run.developments),
                    &i64::from(run.issues),
                    &run.error,
                ],
            )
            .await?;
        debug!("Logged sync run {}", run.run_id);
        Ok(())
    }

    /// Most recent runs, newest first
    pub async fn load_runs(&self) -> Result<Vec<SyncRun>, AppError> {
        let client = self.pool.get().await?;
        client
            .query(
                "SELECT * FROM sync_runs ORDER BY finished_at DESC LIMIT $1",
                &[&RUN_HISTORY],
            )
            .await?
            .iter()
            .map(run_from_row)
            .collect()
    }
}

async fn save_proposal(tx: &Transaction<'_>, p: &Proposal) -> Result<(), AppError> {
    tx.execute(
        "INSERT INTO proposals
            (id, government_source_id, parliamentary_source_id, registry_number, print_number,
             publication_id, title, initiator, origin, topic, document_type, government_status,
             parliamentary_term, withdrawal_signaled, creation_date, phase, created_at, last_modified)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
         ON CONFLICT (id) DO UPDATE SET
            government_source_id = EXCLUDED.government_source_id,
            parliamentary_source_id = EXCLUDED.parliamentary_source_id,
            registry_number = EXCLUDED.registry_number,
            print_number = EXCLUDED.print_number,
            publication_id = EXCLUDED.publication_id,
            title = EXCLUDED.title,
            initiator = EXCLUDED.initiator,
            origin = EXCLUDED.origin,
            topic = EXCLUDED.topic,
            document_type = EXCLUDED.document_type,
            government_status = EXCLUDED.government_status,
            parliamentary_term = EXCLUDED.parliamentary_term,
            withdrawal_signaled = EXCLUDED.withdrawal_signaled,
            creation_date = EXCLUDED.creation_date,
            phase = EXCLUDED.phase,
            last_modified = EXCLUDED.last_modified",
        &[
            &p.id,
            &p.government_source_id,
            &p.parliamentary_source_id,
            &p.registry_number,
            &p.print_number,
            &p.publication_id,
            &p.title,
            &p.initiator,
            &p.origin.map(Origin::as_str),
            &p.topic,
            &p.document_type,
            &p.government_status,
            &p.parliamentary_term.map(i64::from),
            &p.withdrawal_signaled,
            &p.creation_date,
            &p.phase.as_str(),
            &p.created_at,
            &p.last_modified,
        ],
    )
    .await?;
    Ok(())
}

async fn save_voting(tx: &Transaction<'_>, id: Uuid, voting: Option<&Voting>) -> Result<(), AppError> {
    let Some(v) = voting else {
        tx.execute("DELETE FROM votings WHERE proposal_id = $1", &[&id])
            .await?;
        return Ok(());
    };

    tx.execute(
        "DELETE FROM votings WHERE proposal_id = $1 AND id <> $2",
        &[&id, &v.id],
    )
    .await?;
    tx.execute(
        "INSERT INTO votings
            (id, proposal_id, voting_date, yes, no, abstain, total, result, sitting, voting_number, source_stage)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (id) DO UPDATE SET
            voting_date = EXCLUDED.voting_date,
            yes = EXCLUDED.yes,
            no = EXCLUDED.no,
            abstain = EXCLUDED.abstain,
            total = EXCLUDED.total,
            result = EXCLUDED.result,
            sitting = EXCLUDED.sitting,
            voting_number = EXCLUDED.voting_number,
            source_stage = EXCLUDED.source_stage",
        &[
            &v.id,
            &id,
            &v.date,
            &i64::from(v.yes),
            &i64::from(v.no),
            &i64::from(v.abstain),
            &i64::from(v.total),
            &v.result.as_str(),
            &v.sitting.map(i64::from),
            &v.voting_number.map(i64::from),
            &i64::from(v.source_stage.ticks()),
        ],
    )
    .await?;

    tx.execute("DELETE FROM voting_by_party WHERE voting_id = $1", &[&v.id])
        .await?;
    for party in &v.by_party {
        tx.execute(
            "INSERT INTO voting_by_party (voting_id, party, yes, no, abstain, absent, dominant_vote)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &v.id,
                &party.party,
                &i64::from(party.yes),
                &i64::from(party.no),
                &i64::from(party.abstain),
                &i64::from(party.absent),
                &party.dominant_vote.as_str(),
            ],
        )
        .await?;
    }
    Ok(())
}

async fn save_sub_records(tx: &Transaction<'_>, record: &ProposalRecord) -> Result<(), AppError> {
    let id = record.id();
    if let Some(s) = &record.senate_position {
        tx.execute(
            "INSERT INTO senate_positions
                (proposal_id, position_date, stance, position, print_number, decision, amended)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (proposal_id) DO UPDATE SET
                position_date = EXCLUDED.position_date,
                stance = EXCLUDED.stance,
                position = EXCLUDED.position,
                print_number = EXCLUDED.print_number,
                decision = EXCLUDED.decision,
                amended = EXCLUDED.amended",
            &[&id, &s.date, &stance_str(s.stance), &s.position, &s.print_number, &s.decision, &s.amended],
        )
        .await?;
    }
    if let Some(a) = &record.presidential_action {
        tx.execute(
            "INSERT INTO presidential_actions (proposal_id, signature_date, veto_date, amended)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (proposal_id) DO UPDATE SET
                signature_date = EXCLUDED.signature_date,
                veto_date = EXCLUDED.veto_date,
                amended = EXCLUDED.amended",
            &[&id, &a.signature_date, &a.veto_date, &a.amended],
        )
        .await?;
    }
    if let Some(p) = &record.publication {
        tx.execute(
            "INSERT INTO publication_records (proposal_id, reference, publication_date, amended)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (proposal_id) DO UPDATE SET
                reference = EXCLUDED.reference,
                publication_date = EXCLUDED.publication_date,
                amended = EXCLUDED.amended",
            &[&id, &p.reference, &p.date, &p.amended],
        )
        .await?;
    }
    Ok(())
}

fn proposal_from_row(row: &Row) -> Result<Proposal, AppError> {
    let origin: Option<&str> = row.get("origin");
    Ok(Proposal {
        id: row.get("id"),
        government_source_id: row.get("government_source_id"),
        parliamentary_source_id: row.get("parliamentary_source_id"),
        registry_number: row.get("registry_number"),
        print_number: row.get("print_number"),
        publication_id: row.get("publication_id"),
        title: row.get("title"),
        initiator: row.get("initiator"),
        origin: origin.map(parse_column::<Origin>).transpose()?,
        topic: row.get("topic"),
        document_type: row.get("document_type"),
        government_status: row.get("government_status"),
        parliamentary_term: opt_count(row.get("parliamentary_term")),
        withdrawal_signaled: row.get("withdrawal_signaled"),
        creation_date: row.get("creation_date"),
        phase: parse_column::<Phase>(row.get("phase"))?,
        created_at: row.get("created_at"),
        last_modified: row.get("last_modified"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_type_column_round_trip() {
        for t in [
            ParliamentaryStageType::Intake,
            ParliamentaryStageType::CommitteeWork,
            ParliamentaryStageType::ReferralToHeadOfState,
            ParliamentaryStageType::Unknown,
        ] {
            assert_eq!(stage_type_from(t.as_str()), t);
        }
    }

    #[test]
    fn test_stance_column_round_trip() {
        for s in [SenateStance::WithoutAmendments, SenateStance::Rejected, SenateStance::Other] {
            assert_eq!(stance_from(stance_str(s)), s);
        }
    }

    #[test]
    fn test_source_kind_column_round_trip() {
        for kind in [SourceKind::Government, SourceKind::Parliamentary] {
            assert_eq!(source_kind_from(kind.as_str()).unwrap(), kind);
        }
        assert!(source_kind_from("senate").is_err());
        for status in [SyncRunStatus::Completed, SyncRunStatus::Failed, SyncRunStatus::Cancelled] {
            assert_eq!(SyncRunStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_counts_never_wrap() {
        assert_eq!(count(-1), 0);
        assert_eq!(opt_count(Some(i64::MAX)), None);
        assert_eq!(opt_count(Some(430)), Some(430));
    }
}
