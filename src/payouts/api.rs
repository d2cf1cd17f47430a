use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::extractor::AdminUser;

use super::{
    DisbursementStateMachine, Payment, PayoutRun, Processor, RevenueReconciler, RevenueSnapshot,
    TransitionOutcome,
};

/// key: payout-admin-api -> control surface for retry/cancel/fail/sync/pause/resume
pub fn routes() -> Router {
    Router::new()
        .route("/api/admin/payments/:id/retry", post(retry_payment))
        .route("/api/admin/payments/:id/cancel", post(cancel_payment))
        .route("/api/admin/payments/:id/fail", post(fail_payment))
        .route("/api/admin/payments/:id/sync", post(sync_payment))
        .route("/api/admin/payments/:id/revenue", get(payment_revenue))
        .route("/api/admin/sellers/:id/pause", post(pause_seller))
        .route("/api/admin/sellers/:id/resume", post(resume_seller))
        .route("/api/admin/sellers/:id/payments", get(list_seller_payments))
        .route("/api/admin/payouts", post(run_payouts))
        .route("/api/admin/revenue", post(revenue_for_balances))
}

/// Success flag plus a human message; failures never carry raw processor text.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
}

impl ActionResponse {
    pub fn success(message: impl Into<String>, payment: Option<Payment>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payment,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payment: None,
        }
    }
}

fn outcome_response(
    outcome: TransitionOutcome,
    applied: &str,
    unchanged: &str,
) -> Json<ActionResponse> {
    let message = if outcome.is_applied() {
        applied
    } else {
        unchanged
    };
    Json(ActionResponse::success(message, Some(outcome.into_payment())))
}

#[derive(Debug, Default, Deserialize)]
pub struct FailPaymentRequest {
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunPayoutsRequest {
    pub cutoff_date: NaiveDate,
    pub processor: Processor,
    pub seller_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RevenueRequest {
    pub balance_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevenueResponse {
    pub by_product: BTreeMap<i64, i64>,
    pub total_cents: i64,
}

impl From<RevenueSnapshot> for RevenueResponse {
    fn from(snapshot: RevenueSnapshot) -> Self {
        let total_cents = snapshot.total();
        Self {
            by_product: snapshot.into_map(),
            total_cents,
        }
    }
}

async fn retry_payment(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, %payment_id, "admin retry requested");
    let payment = machine.retry(payment_id, Utc::now()).await?;
    let message = format!("Payment retried as {} ({})", payment.id, payment.state);
    Ok(Json(ActionResponse::success(message, Some(payment))))
}

async fn cancel_payment(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, %payment_id, "admin cancel requested");
    let outcome = machine.cancel(payment_id).await?;
    Ok(outcome_response(
        outcome,
        "Payment cancelled",
        "Payment was already cancelled",
    ))
}

async fn fail_payment(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
    payload: Option<Json<FailPaymentRequest>>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, %payment_id, "admin fail requested");
    let failure_reason = payload.and_then(|Json(request)| request.failure_reason);
    let outcome = machine
        .mark_failed_by_admin(payment_id, failure_reason, Utc::now())
        .await?;
    Ok(outcome_response(
        outcome,
        "Payment marked as failed",
        "Payment was already failed",
    ))
}

async fn sync_payment(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, %payment_id, "admin sync requested");
    let outcome = machine.sync(payment_id).await?;
    Ok(outcome_response(
        outcome,
        "Payment synced with processor",
        "Payment already matches processor state",
    ))
}

async fn payment_revenue(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    _admin: AdminUser,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<RevenueResponse>> {
    let reconciler = RevenueReconciler::new(machine.store().clone());
    let snapshot = reconciler.revenue_for_payment(payment_id).await?;
    Ok(Json(snapshot.into()))
}

async fn pause_seller(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(seller_id): Path<i64>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, seller_id, "admin pause requested");
    machine.pause_payouts(seller_id).await?;
    Ok(Json(ActionResponse::success(
        format!("Payouts paused for seller {seller_id}"),
        None,
    )))
}

async fn resume_seller(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Path(seller_id): Path<i64>,
) -> AppResult<Json<ActionResponse>> {
    tracing::info!(admin_id = admin.user_id, seller_id, "admin resume requested");
    machine.resume_payouts(seller_id).await?;
    Ok(Json(ActionResponse::success(
        format!("Payouts resumed for seller {seller_id}"),
        None,
    )))
}

async fn list_seller_payments(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    _admin: AdminUser,
    Path(seller_id): Path<i64>,
) -> AppResult<Json<Vec<Payment>>> {
    let payments = machine.store().payments_for_seller(seller_id).await?;
    Ok(Json(payments))
}

async fn run_payouts(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    admin: AdminUser,
    Json(payload): Json<RunPayoutsRequest>,
) -> AppResult<Json<PayoutRun>> {
    tracing::info!(
        admin_id = admin.user_id,
        processor = %payload.processor,
        cutoff_date = %payload.cutoff_date,
        sellers = payload.seller_ids.len(),
        "admin payout run requested"
    );
    let mut run = machine
        .scheduler()
        .create_payments_for_balances_up_to_date(
            payload.cutoff_date,
            payload.processor,
            &payload.seller_ids,
            true,
            Utc::now(),
        )
        .await?;
    for payment in run.payments.iter_mut() {
        if let Err(err) = machine.submit(payment.id).await {
            tracing::warn!(?err, payment_id = %payment.id, "manual payout submission failed");
        }
        // report the state the submit left behind
        if let Some(current) = machine.store().payment(payment.id).await? {
            *payment = current;
        }
    }
    Ok(Json(run))
}

async fn revenue_for_balances(
    Extension(machine): Extension<Arc<DisbursementStateMachine>>,
    _admin: AdminUser,
    Json(payload): Json<RevenueRequest>,
) -> AppResult<Json<RevenueResponse>> {
    let reconciler = RevenueReconciler::new(machine.store().clone());
    let snapshot = reconciler.revenue_by_product(&payload.balance_ids).await?;
    Ok(Json(snapshot.into()))
}
