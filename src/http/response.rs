//! Response mapping.
//!
//! # Status codes
//! - Receipts: 200 finalized, 202 ambiguous (poll `/v1/receipts/{key}`),
//!   503 submission exhausted, 422 any other ledger failure
//! - Errors: 400 invalid input, 422 unprocessable claim, 404 unknown key,
//!   503 ledger unreachable, 500 storage/configuration

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::relay::error::RelayError;
use crate::relay::types::{Receipt, ReceiptError};

/// A receipt rendered with the status code its outcome implies.
pub struct ReceiptResponse(pub Receipt);

impl IntoResponse for ReceiptResponse {
    fn into_response(self) -> Response {
        let status = match &self.0.error {
            None => StatusCode::OK,
            Some(ReceiptError::AmbiguousFinality { .. }) => StatusCode::ACCEPTED,
            Some(ReceiptError::SubmissionExhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Some(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(self.0)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unprocessable(String),
    NotFound(String),
    Relay(RelayError),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError::Relay(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Relay(err) => {
                let (status, code) = match &err {
                    RelayError::InvalidIntent(_) => (StatusCode::BAD_REQUEST, "invalid_intent"),
                    RelayError::Network(_) | RelayError::Abandoned(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "ledger_unavailable")
                    }
                    RelayError::Rejected(_) | RelayError::Signing(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "rejected")
                    }
                    RelayError::SubmissionExhausted { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "submission_exhausted")
                    }
                    RelayError::AmbiguousFinality { .. } => (StatusCode::ACCEPTED, "ambiguous_finality"),
                    RelayError::Storage(_) | RelayError::Configuration(_) => {
                        tracing::error!(error = %err, "Internal relay error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                    }
                };
                (status, code, err.to_string())
            }
        };

        (status, Json(ErrorBody { error: message, code })).into_response()
    }
}
