use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::payouts::{Processor, ProcessorStatus, ReconciliationHandle, ReconciliationJob};

pub const SIGNATURE_HEADER: &str = "x-payout-signature";

/// Shared secret processors sign webhook bodies with.
#[derive(Clone)]
pub struct WebhookSecret(pub Arc<String>);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::new(secret.into()))
    }

    /// `sha256=<hex>` over the raw body.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, body: &[u8], header: &str) -> bool {
        let Some(encoded) = header.trim().strip_prefix("sha256=") else {
            return false;
        };
        let Ok(signature) = hex::decode(encoded) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&signature).is_ok()
    }

    fn mac(&self) -> Hmac<Sha256> {
        Hmac::<Sha256>::new_from_slice(self.0.as_bytes()).expect("HMAC can use any key length")
    }
}

/// key: webhooks-payouts -> processor transfer callbacks
#[derive(Debug, Deserialize)]
pub struct ProcessorWebhookRequest {
    #[serde(default = "default_event")]
    pub event: String,
    pub correlation_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
}

fn default_event() -> String {
    "transfer.updated".to_string()
}

pub async fn processor_webhook(
    Extension(reconciliation): Extension<ReconciliationHandle>,
    Extension(secret): Extension<WebhookSecret>,
    Path(processor): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !secret.verify(&body, signature) {
        tracing::warn!(%processor, "rejected payout webhook with bad signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let processor = Processor::parse(&processor).ok_or(StatusCode::BAD_REQUEST)?;
    let payload: ProcessorWebhookRequest =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    if payload.correlation_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let job = match payload.event.as_str() {
        "transfer.updated" => {
            let status = payload
                .status
                .as_deref()
                .and_then(|status| ProcessorStatus::parse(status, payload.failure_code.clone()))
                .ok_or(StatusCode::BAD_REQUEST)?;
            ReconciliationJob::StatusChanged {
                processor,
                correlation_id: payload.correlation_id,
                status,
            }
        }
        "transfer.sync_requested" => ReconciliationJob::SyncRequested {
            processor,
            correlation_id: payload.correlation_id,
        },
        other => {
            tracing::debug!(%processor, event = other, "ignoring payout webhook event");
            return Ok(StatusCode::ACCEPTED);
        }
    };

    reconciliation
        .dispatch(job)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips_and_rejects_tampering() {
        let secret = WebhookSecret::new("whsec");
        let body = br#"{"correlation_id":"tr_1","status":"completed"}"#;
        let header = secret.sign(body);
        assert!(header.starts_with("sha256="));
        assert!(secret.verify(body, &header));
        assert!(!secret.verify(b"{}", &header));
        assert!(!WebhookSecret::new("other").verify(body, &header));
        assert!(!secret.verify(body, "sha256=zz"));
        assert!(!secret.verify(body, &header.replace("sha256=", "")));
    }
}
