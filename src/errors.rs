//! Error types for the agent-trace-service crate.
//!
//! This module defines a unified error enumeration used across ingestion,
//! attribution, persistence, and the HTTP surface. It integrates with
//! `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Validation and business errors are the caller's contract and are always
//!   surfaced explicitly as 400 responses.
//! - Attribution failures are never errors; they are results with a null tier.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the agent-trace-service crate.
///
/// - Used across the facade, the attribution engine, and the HTTP handlers.
/// - Implements `std::error::Error` via `thiserror`.
pub enum ServiceError {
    /// A required field is missing or empty in the request payload.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A domain rule was violated (e.g. empty trace_ids on a commit link).
    #[error("{0}")]
    Business(String),

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl ServiceError {
    /// Shorthand for a validation failure on a named field.
    pub fn missing_field(field: &str) -> Self {
        ServiceError::Validation(format!("Missing required field: {field}"))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::Business(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Infrastructure detail stays in the log, not the response body.
            tracing::error!("request failed: {self}");
            return (status, Json(json!({"error": "Internal server error"}))).into_response();
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Business("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_missing_field_message() {
        let err = ServiceError::missing_field("project_id");
        assert_eq!(
            err.to_string(),
            "Validation error: Missing required field: project_id"
        );
    }
}
