//! Error handling module
//!
//! `AppError` is what HTTP handlers return. `SyncIssue` is the per-record
//! problem taxonomy of a sync run; issues are collected, never propagated.

use crate::models::sources::SourceKind;
use crate::proposal::Phase;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

// =============================================================================
// SYNC ISSUES
// =============================================================================

/// A problem with one record, stage or proposal during a sync run
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    #[error("{source_kind} record {source_id} could not be linked with confidence: {reason}")]
    #[serde(rename_all = "camelCase")]
    LinkingAmbiguity {
        source_kind: SourceKind,
        source_id: String,
        reason: String,
        review_id: Option<Uuid>,
    },

    #[error("{source_kind} record {source_id} collides with proposal {existing}: {detail}")]
    #[serde(rename_all = "camelCase")]
    LinkingCollision {
        source_kind: SourceKind,
        source_id: String,
        registry_number: Option<String>,
        existing: Uuid,
        detail: String,
    },

    #[error("invalid {item} in {source_kind} record {source_id}: {reason}")]
    #[serde(rename_all = "camelCase")]
    Validation {
        source_kind: SourceKind,
        source_id: String,
        proposal_id: Option<Uuid>,
        item: String,
        reason: String,
    },

    #[error("proposal {proposal_id} data points back to {indicated} while phase is {current}")]
    #[serde(rename_all = "camelCase")]
    PhaseRegression {
        proposal_id: Uuid,
        current: Phase,
        indicated: Phase,
    },

    #[error("{source_kind} source unavailable: {reason}")]
    #[serde(rename_all = "camelCase")]
    SourceUnavailable { source_kind: SourceKind, reason: String },

    #[error("{record} of proposal {proposal_id} cannot be changed: {detail}")]
    #[serde(rename_all = "camelCase")]
    AmendmentRejected {
        proposal_id: Uuid,
        record: String,
        detail: String,
    },

    #[error("proposal {proposal_id} could not be stored: {reason}")]
    #[serde(rename_all = "camelCase")]
    Persistence { proposal_id: Uuid, reason: String },
}

impl SyncIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncIssue::LinkingAmbiguity { .. } => "linking_ambiguity",
            SyncIssue::LinkingCollision { .. } => "linking_collision",
            SyncIssue::Validation { .. } => "validation",
            SyncIssue::PhaseRegression { .. } => "phase_regression",
            SyncIssue::SourceUnavailable { .. } => "source_unavailable",
            SyncIssue::AmendmentRejected { .. } => "amendment_rejected",
            SyncIssue::Persistence { .. } => "persistence",
        }
    }

    /// Whether the issue belongs in the operator-facing incident log
    pub fn is_incident(&self) -> bool {
        matches!(
            self,
            SyncIssue::LinkingCollision { .. }
                | SyncIssue::SourceUnavailable { .. }
                | SyncIssue::Persistence { .. }
        )
    }
}
