use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    BalanceAccount, BalanceState, NewPayment, Payment, PaymentComment, PaymentState,
    PaymentTransition, Processor, RefundRecord, SaleRecord, Seller,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// key: payout-store -> persistence seam for balances, payments and revenue inputs
///
/// Writers that race on the same rows are resolved inside the store: `create_payment` and
/// `transition_payment` return `Ok(None)` when another writer got there first.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()>;
    async fn seller(&self, seller_id: i64) -> StoreResult<Option<Seller>>;
    async fn set_payouts_paused(&self, seller_id: i64, paused: bool)
        -> StoreResult<Option<Seller>>;
    async fn sellers_due_for_payout(
        &self,
        processor: Processor,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<i64>>;

    async fn insert_balance(&self, balance: &BalanceAccount) -> StoreResult<()>;
    /// Only `unpaid` balances accept adjustments; anything else yields `None`.
    async fn adjust_balance(
        &self,
        balance_id: Uuid,
        delta_cents: i64,
    ) -> StoreResult<Option<BalanceAccount>>;
    async fn unpaid_balances_up_to(
        &self,
        seller_id: i64,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<BalanceAccount>>;
    async fn balances_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<BalanceAccount>>;

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;
    async fn payment_by_correlation_id(
        &self,
        processor: Processor,
        correlation_id: &str,
    ) -> StoreResult<Option<Payment>>;
    async fn open_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>>;
    async fn latest_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>>;
    async fn payments_for_seller(&self, seller_id: i64) -> StoreResult<Vec<Payment>>;
    async fn stale_payments(
        &self,
        processor: Processor,
        states: &[PaymentState],
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>>;

    /// Inserts a `created` payment and moves every listed balance from `unpaid` to `processing`.
    ///
    /// Yields `None` unless every balance is still `unpaid` and their amounts still sum to
    /// `payment.amount_cents`.
    async fn create_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>>;
    /// Applies the transition only if the row is still in `transition.expected`.
    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
    ) -> StoreResult<Option<Payment>>;

    /// Returns `false` when the payment already carries a comment.
    async fn insert_comment_once(
        &self,
        payment_id: Uuid,
        seller_id: i64,
        body: &str,
    ) -> StoreResult<bool>;
    async fn comments_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentComment>>;

    async fn record_sale(&self, sale: &SaleRecord) -> StoreResult<()>;
    async fn record_refund(&self, refund: &RefundRecord) -> StoreResult<()>;
    async fn sales_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<SaleRecord>>;
    async fn refunds_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<RefundRecord>>;
}

#[derive(Default)]
struct MemoryState {
    sellers: Vec<Seller>,
    balances: Vec<BalanceAccount>,
    payments: Vec<Payment>,
    comments: Vec<PaymentComment>,
    sales: Vec<SaleRecord>,
    refunds: Vec<RefundRecord>,
}

impl MemoryState {
    fn open_payment(&self, seller_id: i64) -> Option<&Payment> {
        self.payments
            .iter()
            .find(|payment| payment.seller_id == seller_id && !payment.state.is_terminal())
    }
}

/// key: payout-store-memory -> single-process store for tests and dry runs
#[derive(Default)]
pub struct MemoryPayoutStore {
    state: Mutex<MemoryState>,
}

impl MemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn balance(&self, balance_id: Uuid) -> Option<BalanceAccount> {
        let state = self.state.lock().await;
        state
            .balances
            .iter()
            .find(|balance| balance.id == balance_id)
            .cloned()
    }
}

#[async_trait]
impl PayoutStore for MemoryPayoutStore {
    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.sellers.iter().any(|existing| existing.id == seller.id) {
            return Err(StoreError::InvalidRecord(format!(
                "seller {} already exists",
                seller.id
            )));
        }
        state.sellers.push(seller.clone());
        Ok(())
    }

    async fn seller(&self, seller_id: i64) -> StoreResult<Option<Seller>> {
        let state = self.state.lock().await;
        Ok(state.sellers.iter().find(|s| s.id == seller_id).cloned())
    }

    async fn set_payouts_paused(
        &self,
        seller_id: i64,
        paused: bool,
    ) -> StoreResult<Option<Seller>> {
        let mut state = self.state.lock().await;
        let Some(seller) = state.sellers.iter_mut().find(|s| s.id == seller_id) else {
            return Ok(None);
        };
        seller.payouts_paused = paused;
        Ok(Some(seller.clone()))
    }

    async fn sellers_due_for_payout(
        &self,
        processor: Processor,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<i64>> {
        let state = self.state.lock().await;
        let due: HashSet<i64> = state
            .balances
            .iter()
            .filter(|balance| balance.state == BalanceState::Unpaid && balance.date <= cutoff_date)
            .map(|balance| balance.seller_id)
            .collect();
        let mut sellers: Vec<i64> = state
            .sellers
            .iter()
            .filter(|seller| seller.payout_processor == processor && due.contains(&seller.id))
            .map(|seller| seller.id)
            .collect();
        sellers.sort_unstable();
        Ok(sellers)
    }

    async fn insert_balance(&self, balance: &BalanceAccount) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.balances.push(balance.clone());
        Ok(())
    }

    async fn adjust_balance(
        &self,
        balance_id: Uuid,
        delta_cents: i64,
    ) -> StoreResult<Option<BalanceAccount>> {
        let mut state = self.state.lock().await;
        let Some(balance) = state
            .balances
            .iter_mut()
            .find(|b| b.id == balance_id && b.state == BalanceState::Unpaid)
        else {
            return Ok(None);
        };
        balance.amount_cents += delta_cents;
        balance.holding_amount_cents += delta_cents;
        balance.updated_at = Utc::now();
        Ok(Some(balance.clone()))
    }

    async fn unpaid_balances_up_to(
        &self,
        seller_id: i64,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<BalanceAccount>> {
        let state = self.state.lock().await;
        let mut balances: Vec<BalanceAccount> = state
            .balances
            .iter()
            .filter(|b| {
                b.seller_id == seller_id && b.state == BalanceState::Unpaid && b.date <= cutoff_date
            })
            .cloned()
            .collect();
        balances.sort_by_key(|b| b.date);
        Ok(balances)
    }

    async fn balances_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<BalanceAccount>> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .iter()
            .filter(|b| b.payment_id == Some(payment_id))
            .cloned()
            .collect())
    }

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn payment_by_correlation_id(
        &self,
        processor: Processor,
        correlation_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.processor == processor && p.correlation_id.as_deref() == Some(correlation_id))
            .cloned())
    }

    async fn open_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.open_payment(seller_id).cloned())
    }

    async fn latest_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.seller_id == seller_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn payments_for_seller(&self, seller_id: i64) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.seller_id == seller_id)
            .cloned()
            .collect();
        payments.reverse();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn stale_payments(
        &self,
        processor: Processor,
        states: &[PaymentState],
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| {
                p.processor == processor && states.contains(&p.state) && p.updated_at <= updated_before
            })
            .cloned()
            .collect())
    }

    async fn create_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        if state.open_payment(payment.seller_id).is_some() {
            return Ok(None);
        }
        let claimed: Vec<&BalanceAccount> = state
            .balances
            .iter()
            .filter(|b| {
                payment.balance_ids.contains(&b.id)
                    && b.seller_id == payment.seller_id
                    && b.state == BalanceState::Unpaid
            })
            .collect();
        let claimed_cents: i64 = claimed.iter().map(|b| b.amount_cents).sum();
        // an adjustment since the scheduler's read invalidates its amount
        if claimed.len() != payment.balance_ids.len() || claimed_cents != payment.amount_cents {
            return Ok(None);
        }

        let record = Payment {
            id: Uuid::new_v4(),
            seller_id: payment.seller_id,
            processor: payment.processor,
            payout_period_end_date: payment.payout_period_end_date,
            state: PaymentState::Created,
            correlation_id: None,
            failure_reason: None,
            amount_cents: payment.amount_cents,
            created_at: now,
            updated_at: now,
        };
        for balance in state
            .balances
            .iter_mut()
            .filter(|b| payment.balance_ids.contains(&b.id))
        {
            balance.state = BalanceState::Processing;
            balance.payment_id = Some(record.id);
            balance.updated_at = now;
        }
        state.payments.push(record.clone());
        Ok(Some(record))
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
    ) -> StoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.state == transition.expected)
        else {
            return Ok(None);
        };
        payment.state = transition.next;
        if transition.correlation_id.is_some() {
            payment.correlation_id = transition.correlation_id;
        }
        if transition.failure_reason.is_some() {
            payment.failure_reason = transition.failure_reason;
        }
        payment.updated_at = now;
        let updated = payment.clone();

        if let Some(balance_state) = transition.next.balance_effect() {
            for balance in state
                .balances
                .iter_mut()
                .filter(|b| b.payment_id == Some(payment_id) && b.state == BalanceState::Processing)
            {
                balance.state = balance_state;
                balance.updated_at = now;
            }
        }
        Ok(Some(updated))
    }

    async fn insert_comment_once(
        &self,
        payment_id: Uuid,
        seller_id: i64,
        body: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.comments.iter().any(|c| c.payment_id == payment_id) {
            return Ok(false);
        }
        state.comments.push(PaymentComment {
            id: Uuid::new_v4(),
            payment_id,
            seller_id,
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn comments_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentComment>> {
        let state = self.state.lock().await;
        Ok(state
            .comments
            .iter()
            .filter(|c| c.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn record_sale(&self, sale: &SaleRecord) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.sales.push(sale.clone());
        Ok(())
    }

    async fn record_refund(&self, refund: &RefundRecord) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.refunds.push(refund.clone());
        Ok(())
    }

    async fn sales_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<SaleRecord>> {
        let state = self.state.lock().await;
        let wanted = |id: Option<Uuid>| id.map(|id| balance_ids.contains(&id)).unwrap_or(false);
        Ok(state
            .sales
            .iter()
            .filter(|s| {
                wanted(s.purchase_success_balance_id) || wanted(s.purchase_chargeback_balance_id)
            })
            .cloned()
            .collect())
    }

    async fn refunds_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<RefundRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| balance_ids.contains(&r.balance_id))
            .cloned()
            .collect())
    }
}
