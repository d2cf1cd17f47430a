use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{PayoutError, PayoutResult};
use super::models::{NewPayment, Payment, PaymentState, Processor};
use super::policy::PayoutPolicy;
use super::state_machine::DisbursementStateMachine;
use super::store::PayoutStore;

const SUBMIT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SellerNotFound,
    PayoutsPaused,
    OpenPaymentExists,
    NoEligibleBalances,
    BelowMinimum,
    ConcurrentClaim,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::SellerNotFound => "seller_not_found",
            SkipReason::PayoutsPaused => "payouts_paused",
            SkipReason::OpenPaymentExists => "open_payment_exists",
            SkipReason::NoEligibleBalances => "no_eligible_balances",
            SkipReason::BelowMinimum => "below_minimum",
            SkipReason::ConcurrentClaim => "concurrent_claim",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSeller {
    pub seller_id: i64,
    pub reason: SkipReason,
}

/// Seller whose eligible balances net to a debt; needs manual review instead of a payout.
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedSeller {
    pub seller_id: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutRun {
    pub cutoff_date: NaiveDate,
    pub processor: Processor,
    pub payments: Vec<Payment>,
    pub skipped: Vec<SkippedSeller>,
    pub flagged: Vec<FlaggedSeller>,
}

impl PayoutRun {
    fn new(cutoff_date: NaiveDate, processor: Processor) -> Self {
        Self {
            cutoff_date,
            processor,
            payments: Vec::new(),
            skipped: Vec::new(),
            flagged: Vec::new(),
        }
    }

    fn skip(&mut self, seller_id: i64, reason: SkipReason) {
        debug!(
            seller_id,
            reason = reason.as_str(),
            processor = %self.processor,
            "seller skipped by payout sweep"
        );
        self.skipped.push(SkippedSeller { seller_id, reason });
    }
}

/// key: payout-scheduler -> bundles due balances into payments
#[derive(Clone)]
pub struct PayoutScheduler {
    store: Arc<dyn PayoutStore>,
    policy: PayoutPolicy,
}

impl PayoutScheduler {
    pub fn new(store: Arc<dyn PayoutStore>, policy: PayoutPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &PayoutPolicy {
        &self.policy
    }

    pub async fn create_payments_for_balances_up_to_date(
        &self,
        cutoff_date: NaiveDate,
        processor: Processor,
        seller_ids: &[i64],
        from_admin: bool,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutRun> {
        if cutoff_date > now.date_naive() {
            return Err(PayoutError::invariant(format!(
                "Cutoff date {cutoff_date} is in the future"
            )));
        }
        if seller_ids.is_empty() {
            return Err(PayoutError::invariant("At least one seller is required"));
        }

        let minimum = self.policy.minimum_payout_cents(processor);
        let mut run = PayoutRun::new(cutoff_date, processor);

        for &seller_id in seller_ids {
            let Some(seller) = self.store.seller(seller_id).await? else {
                run.skip(seller_id, SkipReason::SellerNotFound);
                continue;
            };
            if seller.payouts_paused && !from_admin {
                run.skip(seller_id, SkipReason::PayoutsPaused);
                continue;
            }
            if self.store.open_payment_for_seller(seller_id).await?.is_some() {
                run.skip(seller_id, SkipReason::OpenPaymentExists);
                continue;
            }

            let balances = self
                .store
                .unpaid_balances_up_to(seller_id, cutoff_date)
                .await?;
            if balances.is_empty() {
                run.skip(seller_id, SkipReason::NoEligibleBalances);
                continue;
            }

            let amount_cents: i64 = balances.iter().map(|balance| balance.amount_cents).sum();
            if amount_cents < 0 {
                warn!(
                    seller_id,
                    amount_cents,
                    processor = %processor,
                    %cutoff_date,
                    "seller balance is negative; flagged for manual review"
                );
                run.flagged.push(FlaggedSeller {
                    seller_id,
                    amount_cents,
                });
                continue;
            }
            if amount_cents < minimum {
                run.skip(seller_id, SkipReason::BelowMinimum);
                continue;
            }

            let request = NewPayment {
                seller_id,
                processor,
                payout_period_end_date: cutoff_date,
                amount_cents,
                balance_ids: balances.iter().map(|balance| balance.id).collect(),
            };
            match self.store.create_payment(request, now).await? {
                Some(payment) => {
                    info!(
                        payment_id = %payment.id,
                        seller_id,
                        processor = %processor,
                        amount_cents,
                        balances = balances.len(),
                        from_admin,
                        "payment created from unpaid balances"
                    );
                    run.payments.push(payment);
                }
                None => run.skip(seller_id, SkipReason::ConcurrentClaim),
            }
        }

        Ok(run)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub runs: Vec<PayoutRun>,
    pub submitted: usize,
    pub submit_failures: usize,
    pub synced: usize,
}

/// key: payout-sweep -> periodic scheduler loop
pub fn spawn(
    machine: Arc<DisbursementStateMachine>,
    processors: Vec<Processor>,
    interval: TokioDuration,
    cutoff_lag_days: i64,
) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            match process_tick(&machine, &processors, now, cutoff_lag_days).await {
                Ok(summary) => info!(
                    submitted = summary.submitted,
                    submit_failures = summary.submit_failures,
                    synced = summary.synced,
                    "payout sweep completed"
                ),
                Err(err) => warn!(?err, "payout sweep tick failed"),
            }
        }
    });
}

/// key: payout-sweep -> tick handler
pub async fn process_tick(
    machine: &DisbursementStateMachine,
    processors: &[Processor],
    now: DateTime<Utc>,
    cutoff_lag_days: i64,
) -> PayoutResult<TickSummary> {
    let cutoff_date = (now - Duration::days(cutoff_lag_days)).date_naive();
    let store = machine.store();
    let mut summary = TickSummary::default();

    for &processor in processors {
        let sellers = store.sellers_due_for_payout(processor, cutoff_date).await?;
        if sellers.is_empty() {
            debug!(processor = %processor, %cutoff_date, "no sellers due for payout");
        } else {
            let run = machine
                .scheduler()
                .create_payments_for_balances_up_to_date(
                    cutoff_date,
                    processor,
                    &sellers,
                    false,
                    now,
                )
                .await?;
            summary.runs.push(run);
        }

        // includes payments left in `created` by earlier transient submit failures
        let pending = store
            .stale_payments(processor, &[PaymentState::Created], now)
            .await?;
        let payment_ids: Vec<Uuid> = pending.into_iter().map(|payment| payment.id).collect();
        let outcomes: Vec<PayoutResult<_>> = stream::iter(payment_ids)
            .map(move |payment_id| async move { machine.submit(payment_id).await })
            .buffer_unordered(SUBMIT_CONCURRENCY)
            .collect()
            .await;
        for outcome in outcomes {
            match outcome {
                Ok(_) => summary.submitted += 1,
                Err(err) => {
                    summary.submit_failures += 1;
                    warn!(?err, processor = %processor, "payment submission failed during sweep");
                }
            }
        }

        if processor.supports_sync() {
            summary.synced += sync_stale_payments(machine, processor, now).await?;
        }
    }

    machine.locks().prune();
    Ok(summary)
}

async fn sync_stale_payments(
    machine: &DisbursementStateMachine,
    processor: Processor,
    now: DateTime<Utc>,
) -> PayoutResult<usize> {
    let stale_before = now - machine.scheduler().policy().sync_stale_after;
    let stale = machine
        .store()
        .stale_payments(
            processor,
            &[PaymentState::Processing, PaymentState::Unclaimed],
            stale_before,
        )
        .await?;

    let mut synced = 0;
    for payment in stale {
        match machine.sync(payment.id).await {
            Ok(_) => synced += 1,
            Err(err) => warn!(
                ?err,
                payment_id = %payment.id,
                processor = %processor,
                "stale payment sync failed"
            ),
        }
    }
    Ok(synced)
}
