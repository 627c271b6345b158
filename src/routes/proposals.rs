//! Proposal Routes
//!
//! Read-only views over reconciled proposals and their development log.

use crate::error::AppError;
use crate::models::SuccessResponse;
use crate::proposal::{
    Development, DevelopmentFilter, ProposalFilter, ProposalStats, ProposalSummary, ProposalView,
    MAX_PAGE,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

fn check_limit(limit: Option<usize>) -> Result<(), AppError> {
    match limit {
        Some(0) => Err(AppError::BadRequest("limit must be at least 1".to_string())),
        Some(limit) if limit > MAX_PAGE => Err(AppError::BadRequest(format!(
            "limit must not exceed {}",
            MAX_PAGE
        ))),
        _ => Ok(()),
    }
}

/// List proposals, most recently changed first
pub async fn list_proposals(
    State(state): State<SharedState>,
    Query(filter): Query<ProposalFilter>,
) -> Result<Json<SuccessResponse<Vec<ProposalSummary>>>, AppError> {
    check_limit(filter.limit)?;
    let proposals = state.store.list_proposals(&filter).await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} proposals", proposals.len()),
        proposals,
    )))
}

/// Get one proposal with merged stages, phase and voting
pub async fn get_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ProposalView>>, AppError> {
    let view = state.store.get_view(id).await?;
    Ok(Json(SuccessResponse::with_data("Proposal retrieved", view)))
}

/// Renumber a proposal's parliamentary stages to whole positions
pub async fn resequence_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ProposalView>>, AppError> {
    let view = state.sync.resequence(id).await?;
    Ok(Json(SuccessResponse::with_data("Stages resequenced", view)))
}

/// List developments, newest first
pub async fn list_developments(
    State(state): State<SharedState>,
    Query(filter): Query<DevelopmentFilter>,
) -> Result<Json<SuccessResponse<Vec<Development>>>, AppError> {
    check_limit(filter.limit)?;
    let developments = state.store.list_developments(&filter).await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} developments", developments.len()),
        developments,
    )))
}

/// Proposal counts per phase
pub async fn get_stats(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<ProposalStats>>, AppError> {
    let stats = state.store.stats().await;
    Ok(Json(SuccessResponse::with_data("Statistics retrieved", stats)))
}
