//! Review Routes
//!
//! Manual link confirmation queue and the operator incident log.

use crate::error::AppError;
use crate::models::SuccessResponse;
use crate::pipeline::ReviewResolution;
use crate::proposal::{Incident, ReviewItem};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// Pending review items
pub async fn list_review_queue(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<Vec<ReviewItem>>>, AppError> {
    let items = state.store.pending_reviews().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} items awaiting review", items.len()),
        items,
    )))
}

pub async fn confirm_link(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ReviewResolution>>, AppError> {
    let resolution = state.sync.confirm_review(id).await?;
    Ok(Json(SuccessResponse::with_data("Link confirmed", resolution)))
}

pub async fn dismiss_link(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ReviewResolution>>, AppError> {
    let resolution = state.sync.dismiss_review(id).await?;
    Ok(Json(SuccessResponse::with_data("Link dismissed", resolution)))
}

/// Collisions, outages and failed writes, newest first
pub async fn list_incidents(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<Vec<Incident>>>, AppError> {
    let incidents = state.store.incidents().await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} incidents", incidents.len()),
        incidents,
    )))
}
