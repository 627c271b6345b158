//! Sync Routes
//!
//! Inbound batches from the government and parliamentary source adapters.

use crate::error::AppError;
use crate::models::sources::{GovernmentRecord, ParliamentaryRecord, SyncBatch};
use crate::models::SuccessResponse;
use crate::pipeline::SyncReport;
use crate::proposal::SourceSyncStatus;
use crate::state::SharedState;
use axum::{extract::State, Json};

fn summary(report: &SyncReport) -> String {
    format!(
        "Processed {} {} records ({} issues)",
        report.received,
        report.source_kind,
        report.issues.len()
    )
}

/// Reconcile a government-source batch
pub async fn sync_government(
    State(state): State<SharedState>,
    Json(batch): Json<SyncBatch<GovernmentRecord>>,
) -> Result<Json<SuccessResponse<SyncReport>>, AppError> {
    let report = state.sync.run_government(batch).await;
    Ok(Json(SuccessResponse::with_data(summary(&report), report)))
}

/// Reconcile a parliamentary-source batch
pub async fn sync_parliamentary(
    State(state): State<SharedState>,
    Json(batch): Json<SyncBatch<ParliamentaryRecord>>,
) -> Result<Json<SuccessResponse<SyncReport>>, AppError> {
    let report = state.sync.run_parliamentary(batch).await;
    Ok(Json(SuccessResponse::with_data(summary(&report), report)))
}

/// Latest and latest completed run per source
pub async fn list_sync_runs(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<Vec<SourceSyncStatus>>>, AppError> {
    let status = state.store.sync_status().await;
    Ok(Json(SuccessResponse::with_data("Sync runs retrieved", status)))
}
