//! Request IDs and request bodies.
//!
//! Every request gets an `x-request-id` (UUID v4 unless the caller sent one),
//! echoed on the response and recorded on the trace span.

use alloy::primitives::Bytes;
use axum::http::{HeaderName, HeaderValue, Request};
use serde::Deserialize;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::relay::types::{IntentKind, TransactionIntent};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Body of `POST /v1/intents`.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentRequest {
    pub kind: IntentKind,
    pub idempotency_key: String,
    /// Hex payload, with or without `0x`.
    #[serde(default)]
    pub payload_hex: String,
}

impl IntentRequest {
    pub fn into_intent(self) -> Result<TransactionIntent, String> {
        let payload = alloy::hex::decode(self.payload_hex.trim())
            .map_err(|e| format!("payload_hex is not valid hex: {}", e))?;
        Ok(TransactionIntent::new(
            self.kind,
            self.idempotency_key,
            Bytes::from(payload),
        ))
    }
}

/// Body of `POST /v1/claims/reward`, as sent by the game server at session end.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardClaimRequest {
    pub game_session_id: String,
    pub player_address: String,
    pub won: bool,
    pub reward_amount: u64,
}

impl RewardClaimRequest {
    /// Only a won session with a positive reward produces a claim.
    pub fn into_intent(self) -> Result<TransactionIntent, String> {
        if !self.won {
            return Err("session was not won; no reward to claim".to_string());
        }
        if self.reward_amount == 0 {
            return Err("reward_amount must be greater than zero".to_string());
        }
        if self.game_session_id.trim().is_empty() || self.player_address.trim().is_empty() {
            return Err("game_session_id and player_address are required".to_string());
        }
        Ok(TransactionIntent::reward_claim(
            &self.game_session_id,
            &self.player_address,
            self.reward_amount,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_request_decodes_hex() {
        let req: IntentRequest = serde_json::from_str(
            r#"{"kind":"commit_hash","idempotency_key":"m-1","payload_hex":"0xdeadbeef"}"#,
        )
        .unwrap();
        let intent = req.into_intent().unwrap();
        assert_eq!(intent.kind, IntentKind::CommitHash);
        assert_eq!(&intent.payload[..], &[0xde, 0xad, 0xbe, 0xef]);

        let bad = IntentRequest {
            kind: IntentKind::SponsoredCall,
            idempotency_key: "k".to_string(),
            payload_hex: "zz".to_string(),
        };
        assert!(bad.into_intent().is_err());
    }

    #[test]
    fn test_reward_claim_requires_win_and_amount() {
        let base = RewardClaimRequest {
            game_session_id: "session-42".to_string(),
            player_address: "player-A".to_string(),
            won: true,
            reward_amount: 100,
        };
        let intent = base.clone().into_intent().unwrap();
        assert_eq!(intent.idempotency_key, "session-42:player-A");

        let lost = RewardClaimRequest { won: false, ..base.clone() };
        assert!(lost.into_intent().is_err());

        let zero = RewardClaimRequest { reward_amount: 0, ..base };
        assert!(zero.into_intent().is_err());
    }
}
