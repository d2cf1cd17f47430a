use std::sync::Arc;

use axum::{extract::Extension, routing::post, Router};

use crate::payouts::{self, DisbursementStateMachine, ReconciliationHandle};
use crate::webhooks::{self, WebhookSecret};

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/webhooks/processors/:processor",
            post(webhooks::processor_webhook),
        )
        .merge(payouts::admin_routes())
}

/// API routes with the payout services attached as request extensions.
pub fn payout_app(
    machine: Arc<DisbursementStateMachine>,
    reconciliation: ReconciliationHandle,
    webhook_secret: WebhookSecret,
) -> Router {
    api_routes()
        .layer(Extension(machine))
        .layer(Extension(reconciliation))
        .layer(Extension(webhook_secret))
}
