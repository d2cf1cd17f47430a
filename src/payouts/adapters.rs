use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::models::{Payment, Processor};

/// Provider reference for a submitted transfer, persisted as `payments.correlation_id`.
pub type ProviderRef = String;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("processor unavailable: {0}")]
    Unavailable(String),
    #[error("processor rejected request ({code:?}): {message}")]
    InvalidRequest {
        code: Option<String>,
        message: String,
    },
    #[error("processor rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
}

impl ProcessorError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessorError::Unavailable(_) | ProcessorError::RateLimited { .. }
        )
    }

    pub fn failure_code(&self) -> Option<String> {
        match self {
            ProcessorError::InvalidRequest { code, .. } => code.clone(),
            _ => None,
        }
    }
}

/// Authoritative transfer state as reported by a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessorStatus {
    Pending,
    Unclaimed,
    Completed,
    Failed {
        #[serde(default)]
        failure_code: Option<String>,
    },
    Returned {
        #[serde(default)]
        failure_code: Option<String>,
    },
    Cancelled,
}

impl ProcessorStatus {
    pub fn parse(status: &str, failure_code: Option<String>) -> Option<Self> {
        match status {
            "pending" | "processing" => Some(Self::Pending),
            "unclaimed" => Some(Self::Unclaimed),
            "completed" | "paid" => Some(Self::Completed),
            "failed" => Some(Self::Failed { failure_code }),
            "returned" => Some(Self::Returned { failure_code }),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// key: payout-adapter -> narrow processor integration
#[async_trait]
pub trait ProcessorAdapter: Send + Sync {
    async fn submit_transfer(&self, payment: &Payment) -> Result<ProviderRef, ProcessorError>;
    async fn query_status(&self, provider_ref: &str) -> Result<ProcessorStatus, ProcessorError>;
    async fn cancel_transfer(&self, provider_ref: &str) -> Result<(), ProcessorError>;
}

/// key: payout-adapter-registry -> processor -> adapter binding
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Processor, Arc<dyn ProcessorAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, processor: Processor, adapter: Arc<dyn ProcessorAdapter>) -> Self {
        self.adapters.insert(processor, adapter);
        self
    }

    pub fn get(&self, processor: Processor) -> Option<Arc<dyn ProcessorAdapter>> {
        self.adapters.get(&processor).cloned()
    }
}

/// key: payout-adapter-http -> processor gateway sidecar client
pub struct HttpProcessorAdapter {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    processor: Processor,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    provider_ref: String,
}

#[derive(Debug, Deserialize)]
struct TransferStatusResponse {
    status: String,
    #[serde(default)]
    failure_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpProcessorAdapter {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        processor: Processor,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build processor gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token,
            processor,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.processor.as_str(),
            path
        )
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.bearer_auth(token)
        } else {
            request
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ProcessorError> {
        let response = self
            .auth(request)
            .send()
            .await
            .map_err(|err| ProcessorError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            return Err(ProcessorError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            return Err(ProcessorError::Unavailable(format!(
                "gateway responded with {status}"
            )));
        }

        let body = response
            .json::<GatewayErrorBody>()
            .await
            .unwrap_or_default();
        Err(ProcessorError::InvalidRequest {
            code: body.code,
            message: body
                .message
                .unwrap_or_else(|| format!("gateway responded with {status}")),
        })
    }
}

#[async_trait]
impl ProcessorAdapter for HttpProcessorAdapter {
    async fn submit_transfer(&self, payment: &Payment) -> Result<ProviderRef, ProcessorError> {
        let payload = json!({
            "payment_id": payment.id,
            "seller_id": payment.seller_id,
            "amount_cents": payment.amount_cents,
            "payout_period_end_date": payment.payout_period_end_date,
        });
        let response = self
            .send(self.client.post(self.endpoint("transfers")).json(&payload))
            .await?;
        let parsed: TransferResponse = response
            .json()
            .await
            .map_err(|err| ProcessorError::Unavailable(format!("undecodable response: {err}")))?;
        Ok(parsed.provider_ref)
    }

    async fn query_status(&self, provider_ref: &str) -> Result<ProcessorStatus, ProcessorError> {
        let response = self
            .send(
                self.client
                    .get(self.endpoint(&format!("transfers/{provider_ref}"))),
            )
            .await?;
        let parsed: TransferStatusResponse = response
            .json()
            .await
            .map_err(|err| ProcessorError::Unavailable(format!("undecodable response: {err}")))?;
        ProcessorStatus::parse(&parsed.status, parsed.failure_code).ok_or_else(|| {
            ProcessorError::Unavailable(format!("unrecognised transfer status {}", parsed.status))
        })
    }

    async fn cancel_transfer(&self, provider_ref: &str) -> Result<(), ProcessorError> {
        self.send(
            self.client
                .post(self.endpoint(&format!("transfers/{provider_ref}/cancel"))),
        )
        .await?;
        Ok(())
    }
}
