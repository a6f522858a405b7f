use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::request::{IntentRequest, RewardClaimRequest};
use crate::http::response::{ApiError, ReceiptResponse};
use crate::http::server::AppState;
use crate::relay::pipeline::ReceiptStatus;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub ledger_reachable: bool,
}

#[derive(Debug, Serialize)]
struct InFlight<'a> {
    idempotency_key: &'a str,
    status: &'static str,
}

pub async fn submit_intent(
    State(state): State<AppState>,
    Json(body): Json<IntentRequest>,
) -> Result<ReceiptResponse, ApiError> {
    let intent = body.into_intent().map_err(ApiError::BadRequest)?;
    let receipt = state.pipeline.submit_and_confirm(intent).await?;
    Ok(ReceiptResponse(receipt))
}

pub async fn claim_reward(
    State(state): State<AppState>,
    Json(body): Json<RewardClaimRequest>,
) -> Result<ReceiptResponse, ApiError> {
    let session = body.game_session_id.clone();
    let intent = body.into_intent().map_err(|reason| {
        tracing::info!(session = %session, reason = %reason, "Reward claim refused");
        ApiError::Unprocessable(reason)
    })?;
    let receipt = state.pipeline.submit_and_confirm(intent).await?;
    Ok(ReceiptResponse(receipt))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match state.pipeline.check_receipt(&key).await {
        ReceiptStatus::Unknown => Err(ApiError::NotFound(format!("no claim for key '{}'", key))),
        ReceiptStatus::InFlight => Ok((
            StatusCode::ACCEPTED,
            Json(InFlight {
                idempotency_key: &key,
                status: "in_flight",
            }),
        )
            .into_response()),
        ReceiptStatus::Ready(receipt) => Ok(ReceiptResponse(receipt).into_response()),
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let ledger_reachable = state.pipeline.ledger_healthy().await;
    let (status, label) = if ledger_reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthStatus {
            version: env!("CARGO_PKG_VERSION"),
            status: label,
            ledger_reachable,
        }),
    )
}
