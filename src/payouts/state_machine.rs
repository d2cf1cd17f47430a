use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::adapters::{AdapterRegistry, ProcessorAdapter, ProcessorError, ProcessorStatus};
use super::error::{PayoutError, PayoutResult};
use super::locks::PaymentLocks;
use super::models::{Payment, PaymentState, PaymentTransition, Processor, Seller};
use super::policy::PayoutPolicy;
use super::remediation::remediation_for;
use super::scheduler::PayoutScheduler;
use super::store::PayoutStore;

/// Result of a transition request. `Unchanged` means the payment already sat in the
/// requested state (replayed webhook, lost race against an identical admin action).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "payment", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied(Payment),
    Unchanged(Payment),
}

impl TransitionOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            TransitionOutcome::Applied(payment) | TransitionOutcome::Unchanged(payment) => payment,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            TransitionOutcome::Applied(payment) | TransitionOutcome::Unchanged(payment) => payment,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// key: disbursement-state-machine -> payment lifecycle driven by processors and admins
pub struct DisbursementStateMachine {
    store: Arc<dyn PayoutStore>,
    adapters: AdapterRegistry,
    locks: PaymentLocks,
    scheduler: PayoutScheduler,
}

impl DisbursementStateMachine {
    pub fn new(store: Arc<dyn PayoutStore>, adapters: AdapterRegistry, policy: PayoutPolicy) -> Self {
        let scheduler = PayoutScheduler::new(store.clone(), policy);
        Self {
            store,
            adapters,
            locks: PaymentLocks::new(),
            scheduler,
        }
    }

    pub fn store(&self) -> &Arc<dyn PayoutStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &PayoutScheduler {
        &self.scheduler
    }

    pub fn locks(&self) -> &PaymentLocks {
        &self.locks
    }

    fn policy(&self) -> &PayoutPolicy {
        self.scheduler.policy()
    }

    async fn load(&self, payment_id: Uuid) -> PayoutResult<Payment> {
        self.store
            .payment(payment_id)
            .await?
            .ok_or_else(|| PayoutError::payment_not_found(payment_id))
    }

    fn adapter(&self, processor: Processor) -> PayoutResult<Arc<dyn ProcessorAdapter>> {
        self.adapters.get(processor).ok_or_else(|| {
            PayoutError::invariant(format!("No processor adapter configured for {processor}"))
        })
    }

    fn provider_ref<'a>(&self, payment: &'a Payment) -> PayoutResult<&'a str> {
        payment.correlation_id.as_deref().ok_or_else(|| {
            PayoutError::invariant("Payment has not been submitted to the processor yet")
        })
    }

    fn processor_error(&self, processor: Processor, err: ProcessorError) -> PayoutError {
        if err.is_transient() {
            warn!(?err, processor = %processor, "transient processor error");
            PayoutError::TransientProcessor { processor }
        } else {
            warn!(?err, processor = %processor, "processor rejected request");
            PayoutError::PermanentProcessor {
                processor,
                failure_reason: err.failure_code(),
            }
        }
    }

    async fn apply(
        &self,
        payment: &Payment,
        transition: PaymentTransition,
    ) -> PayoutResult<Payment> {
        let from = transition.expected;
        let to = transition.next;
        match self.store.transition_payment(payment.id, transition).await? {
            Some(updated) => {
                info!(
                    payment_id = %updated.id,
                    seller_id = updated.seller_id,
                    processor = %updated.processor,
                    from = %from,
                    to = %to,
                    failure_reason = ?updated.failure_reason,
                    "payment transitioned"
                );
                Ok(updated)
            }
            None => {
                let current = self.load(payment.id).await?;
                warn!(
                    payment_id = %payment.id,
                    expected = %from,
                    current = %current.state,
                    "payment transition lost a concurrent update"
                );
                Err(PayoutError::ConcurrencyConflict {
                    payment_id: payment.id,
                    current_state: current.state,
                })
            }
        }
    }

    async fn post_remediation(&self, payment: &Payment, failure_code: Option<&str>) {
        let Some(text) = failure_code.and_then(|code| remediation_for(payment.processor, code))
        else {
            return;
        };
        match self
            .store
            .insert_comment_once(payment.id, payment.seller_id, text)
            .await
        {
            Ok(true) => info!(
                payment_id = %payment.id,
                seller_id = payment.seller_id,
                failure_code = ?failure_code,
                "posted payout remediation comment"
            ),
            Ok(false) => {}
            Err(err) => warn!(
                ?err,
                payment_id = %payment.id,
                "failed to post payout remediation comment"
            ),
        }
    }

    /// `created -> processing` via the processor; permanent rejections fail the payment.
    pub async fn submit(&self, payment_id: Uuid) -> PayoutResult<TransitionOutcome> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        if payment.state != PaymentState::Created {
            return Ok(TransitionOutcome::Unchanged(payment));
        }

        let adapter = self.adapter(payment.processor)?;
        match adapter.submit_transfer(&payment).await {
            Ok(provider_ref) => {
                let transition =
                    PaymentTransition::new(PaymentState::Created, PaymentState::Processing)
                        .with_correlation_id(provider_ref);
                let updated = self.apply(&payment, transition).await?;
                Ok(TransitionOutcome::Applied(updated))
            }
            Err(err) if err.is_transient() => Err(self.processor_error(payment.processor, err)),
            Err(err) => {
                let failure_reason = err.failure_code();
                let transition =
                    PaymentTransition::new(PaymentState::Created, PaymentState::Failed)
                        .with_failure_reason(failure_reason.clone());
                let updated = self.apply(&payment, transition).await?;
                self.post_remediation(&updated, failure_reason.as_deref())
                    .await;
                Err(self.processor_error(payment.processor, err))
            }
        }
    }

    /// Webhook and sync entry point.
    pub async fn apply_processor_status(
        &self,
        payment_id: Uuid,
        status: ProcessorStatus,
    ) -> PayoutResult<TransitionOutcome> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        self.apply_status_locked(payment, status).await
    }

    pub async fn apply_processor_event(
        &self,
        processor: Processor,
        correlation_id: &str,
        status: ProcessorStatus,
    ) -> PayoutResult<TransitionOutcome> {
        let payment = self
            .store
            .payment_by_correlation_id(processor, correlation_id)
            .await?
            .ok_or_else(|| PayoutError::NotFound {
                entity: "payment",
                id: correlation_id.to_string(),
            })?;
        self.apply_processor_status(payment.id, status).await
    }

    async fn apply_status_locked(
        &self,
        payment: Payment,
        status: ProcessorStatus,
    ) -> PayoutResult<TransitionOutcome> {
        let (target, failure_code) = match status {
            ProcessorStatus::Pending => return Ok(TransitionOutcome::Unchanged(payment)),
            ProcessorStatus::Unclaimed => (PaymentState::Unclaimed, None),
            ProcessorStatus::Completed => (PaymentState::Completed, None),
            ProcessorStatus::Failed { failure_code } => (PaymentState::Failed, failure_code),
            ProcessorStatus::Returned { failure_code } => (PaymentState::Returned, failure_code),
            ProcessorStatus::Cancelled => (PaymentState::Cancelled, None),
        };

        if payment.state == target {
            return Ok(TransitionOutcome::Unchanged(payment));
        }
        if payment.state.is_terminal() {
            info!(
                payment_id = %payment.id,
                state = %payment.state,
                reported = %target,
                "ignoring processor status for terminal payment"
            );
            return Ok(TransitionOutcome::Unchanged(payment));
        }
        if target == PaymentState::Cancelled && !payment.processor.supports_cancel() {
            return Err(PayoutError::invariant(format!(
                "{} payments cannot be cancelled",
                payment.processor
            )));
        }
        if !payment.state.can_transition_to(target) {
            return Err(PayoutError::invariant(format!(
                "Payment cannot move from {} to {}",
                payment.state, target
            )));
        }

        let transition = PaymentTransition::new(payment.state, target)
            .with_failure_reason(failure_code.clone());
        let updated = self.apply(&payment, transition).await?;
        if target == PaymentState::Failed {
            self.post_remediation(&updated, failure_code.as_deref()).await;
        }
        Ok(TransitionOutcome::Applied(updated))
    }

    /// Admin override for payments the processor never resolved.
    pub async fn mark_failed_by_admin(
        &self,
        payment_id: Uuid,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> PayoutResult<TransitionOutcome> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        if payment.state == PaymentState::Failed {
            return Ok(TransitionOutcome::Unchanged(payment));
        }
        if payment.state != PaymentState::Processing {
            return Err(PayoutError::invariant(format!(
                "Payment can only be marked as failed while processing; it is {}",
                payment.state
            )));
        }
        let min_age = self.policy().admin_fail_min_age;
        if payment.created_at > now - min_age {
            return Err(PayoutError::invariant(format!(
                "Payment can only be marked as failed {} days after it was created",
                min_age.num_days()
            )));
        }

        let transition = PaymentTransition::new(PaymentState::Processing, PaymentState::Failed)
            .with_failure_reason(failure_reason.clone());
        let updated = self.apply(&payment, transition).await?;
        self.post_remediation(&updated, failure_reason.as_deref())
            .await;
        Ok(TransitionOutcome::Applied(updated))
    }

    pub async fn cancel(&self, payment_id: Uuid) -> PayoutResult<TransitionOutcome> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        if !payment.processor.supports_cancel() {
            return Err(PayoutError::invariant("Only PayPal payments can be cancelled"));
        }
        if payment.state == PaymentState::Cancelled {
            return Ok(TransitionOutcome::Unchanged(payment));
        }
        if !matches!(
            payment.state,
            PaymentState::Processing | PaymentState::Unclaimed
        ) {
            return Err(PayoutError::invariant(format!(
                "Payment cannot be cancelled while {}",
                payment.state
            )));
        }

        let provider_ref = self.provider_ref(&payment)?;
        self.adapter(payment.processor)?
            .cancel_transfer(provider_ref)
            .await
            .map_err(|err| self.processor_error(payment.processor, err))?;

        let transition = PaymentTransition::new(payment.state, PaymentState::Cancelled);
        let updated = self.apply(&payment, transition).await?;
        Ok(TransitionOutcome::Applied(updated))
    }

    pub async fn sync(&self, payment_id: Uuid) -> PayoutResult<TransitionOutcome> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        if !payment.processor.supports_sync() {
            return Err(PayoutError::invariant("Only PayPal payments can be synced"));
        }
        if payment.state.is_terminal() {
            return Err(PayoutError::invariant(format!(
                "Cannot sync a payment that is already {}",
                payment.state
            )));
        }

        let provider_ref = self.provider_ref(&payment)?;
        let status = match self
            .adapter(payment.processor)?
            .query_status(provider_ref)
            .await
        {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                return Err(self.processor_error(payment.processor, err))
            }
            Err(err) => {
                // the processor no longer recognises the transfer
                let processor = payment.processor;
                let failed = ProcessorStatus::Failed {
                    failure_code: err.failure_code(),
                };
                self.apply_status_locked(payment, failed).await?;
                return Err(self.processor_error(processor, err));
            }
        };
        self.apply_status_locked(payment, status).await
    }

    /// Re-runs the payout for the same period; the old payment stays as history.
    pub async fn retry(&self, payment_id: Uuid, now: DateTime<Utc>) -> PayoutResult<Payment> {
        let _guard = self.locks.acquire(payment_id).await;
        let payment = self.load(payment_id).await?;
        if !payment.state.is_retryable() {
            return Err(PayoutError::invariant(format!(
                "Only cancelled, failed or returned payments can be retried; payment is {}",
                payment.state
            )));
        }
        let latest = self.store.latest_payment_for_seller(payment.seller_id).await?;
        if latest.map(|latest| latest.id) != Some(payment.id) {
            return Err(PayoutError::invariant(
                "Only the most recent payment for a seller can be retried",
            ));
        }

        let run = self
            .scheduler
            .create_payments_for_balances_up_to_date(
                payment.payout_period_end_date,
                payment.processor,
                &[payment.seller_id],
                true,
                now,
            )
            .await?;
        let Some(created) = run.payments.into_iter().next() else {
            let reason = if let Some(flagged) = run.flagged.first() {
                format!("seller balance is negative ({} cents)", flagged.amount_cents)
            } else {
                run.skipped
                    .first()
                    .map(|skipped| skipped.reason.as_str().to_string())
                    .unwrap_or_else(|| "no payment created".to_string())
            };
            return Err(PayoutError::invariant(format!(
                "Retry created no new payment: {reason}"
            )));
        };
        info!(
            payment_id = %payment.id,
            retry_payment_id = %created.id,
            seller_id = payment.seller_id,
            "payment retried"
        );

        if let Err(err) = self.submit(created.id).await {
            warn!(
                ?err,
                payment_id = %created.id,
                "retried payment could not be submitted"
            );
        }
        self.load(created.id).await
    }

    pub async fn pause_payouts(&self, seller_id: i64) -> PayoutResult<Seller> {
        let seller = self
            .store
            .set_payouts_paused(seller_id, true)
            .await?
            .ok_or_else(|| PayoutError::seller_not_found(seller_id))?;
        info!(seller_id, "payouts paused");
        Ok(seller)
    }

    pub async fn resume_payouts(&self, seller_id: i64) -> PayoutResult<Seller> {
        let seller = self
            .store
            .set_payouts_paused(seller_id, false)
            .await?
            .ok_or_else(|| PayoutError::seller_not_found(seller_id))?;
        info!(seller_id, "payouts resumed");
        Ok(seller)
    }
}
