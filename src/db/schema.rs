//! Table definitions
//!
//! Uniqueness keys mirror the invariants of the in-memory model.

use crate::error::AppError;
use deadpool_postgres::Pool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS proposals (
        id UUID PRIMARY KEY,
        government_source_id TEXT UNIQUE,
        parliamentary_source_id TEXT UNIQUE,
        registry_number TEXT UNIQUE,
        print_number TEXT,
        publication_id TEXT,
        title TEXT NOT NULL,
        initiator TEXT,
        origin TEXT,
        topic TEXT,
        document_type TEXT,
        government_status TEXT,
        parliamentary_term BIGINT,
        withdrawal_signaled BOOLEAN NOT NULL DEFAULT false,
        creation_date DATE,
        phase TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        last_modified TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS government_stages (
        proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
        seq SMALLINT NOT NULL,
        name TEXT NOT NULL,
        active BOOLEAN NOT NULL,
        start_date DATE,
        last_modified DATE,
        catalog_id TEXT,
        UNIQUE (proposal_id, seq)
    )",
    "CREATE TABLE IF NOT EXISTS parliamentary_stages (
        proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
        seq BIGINT NOT NULL,
        source_seq BIGINT,
        stage_type TEXT NOT NULL,
        source_type TEXT NOT NULL,
        name TEXT NOT NULL,
        stage_date DATE,
        decision TEXT,
        print_number TEXT,
        committee_code TEXT,
        rapporteur TEXT,
        tally JSONB,
        UNIQUE (proposal_id, seq)
    )",
    "CREATE TABLE IF NOT EXISTS votings (
        id UUID PRIMARY KEY,
        proposal_id UUID NOT NULL UNIQUE REFERENCES proposals(id) ON DELETE CASCADE,
        voting_date DATE,
        yes BIGINT NOT NULL,
        no BIGINT NOT NULL,
        abstain BIGINT NOT NULL,
        total BIGINT NOT NULL,
        result TEXT NOT NULL,
        sitting BIGINT,
        voting_number BIGINT,
        source_stage BIGINT NOT NULL,
        CHECK (yes + no + abstain <= total)
    )",
    "CREATE TABLE IF NOT EXISTS voting_by_party (
        voting_id UUID NOT NULL REFERENCES votings(id) ON DELETE CASCADE,
        party TEXT NOT NULL,
        yes BIGINT NOT NULL,
        no BIGINT NOT NULL,
        abstain BIGINT NOT NULL,
        absent BIGINT NOT NULL,
        dominant_vote TEXT NOT NULL,
        UNIQUE (voting_id, party)
    )",
    "CREATE TABLE IF NOT EXISTS developments (
        id UUID PRIMARY KEY,
        proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        classification TEXT NOT NULL,
        prior_phase TEXT NOT NULL,
        new_phase TEXT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        UNIQUE (proposal_id, prior_phase, new_phase)
    )",
    "CREATE TABLE IF NOT EXISTS senate_positions (
        proposal_id UUID PRIMARY KEY REFERENCES proposals(id) ON DELETE CASCADE,
        position_date DATE,
        stance TEXT NOT NULL,
        position TEXT NOT NULL,
        print_number TEXT,
        decision TEXT,
        amended BOOLEAN NOT NULL DEFAULT false
    )",
    "CREATE TABLE IF NOT EXISTS presidential_actions (
        proposal_id UUID PRIMARY KEY REFERENCES proposals(id) ON DELETE CASCADE,
        signature_date DATE,
        veto_date DATE,
        amended BOOLEAN NOT NULL DEFAULT false
    )",
    "CREATE TABLE IF NOT EXISTS publication_records (
        proposal_id UUID PRIMARY KEY REFERENCES proposals(id) ON DELETE CASCADE,
        reference TEXT NOT NULL,
        publication_date DATE,
        amended BOOLEAN NOT NULL DEFAULT false
    )",
    "CREATE TABLE IF NOT EXISTS sync_runs (
        run_id UUID PRIMARY KEY,
        source_kind TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ NOT NULL,
        received BIGINT NOT NULL,
        linked BIGINT NOT NULL,
        created BIGINT NOT NULL,
        updated BIGINT NOT NULL,
        failed BIGINT NOT NULL,
        developments BIGINT NOT NULL,
        issues BIGINT NOT NULL,
        error_message TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_source ON sync_runs(source_kind, finished_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_developments_occurred_at ON developments(occurred_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_proposals_phase ON proposals(phase)",
];

/// Create database tables if they don't exist
pub async fn ensure_schema(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    for statement in STATEMENTS {
        client.execute(*statement, &[]).await?;
    }
    info!("Database tables initialized");
    Ok(())
}
