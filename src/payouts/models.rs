use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: payout-processor -> payment rail + capabilities
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "payment_processor", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Processor {
    Stripe,
    Paypal,
}

impl Processor {
    pub const ALL: [Processor; 2] = [Processor::Stripe, Processor::Paypal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Stripe => "stripe",
            Processor::Paypal => "paypal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stripe" => Some(Self::Stripe),
            "paypal" => Some(Self::Paypal),
            _ => None,
        }
    }

    /// Whether an issued transfer can be pulled back before the recipient claims it.
    pub fn supports_cancel(&self) -> bool {
        matches!(self, Processor::Paypal)
    }

    /// Whether the processor can be polled for the authoritative transfer state.
    pub fn supports_sync(&self) -> bool {
        matches!(self, Processor::Paypal)
    }
}

impl std::fmt::Display for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: payout-balance-state -> ledger row lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "balance_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BalanceState {
    Unpaid,
    Processing,
    Paid,
}

impl BalanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceState::Unpaid => "unpaid",
            BalanceState::Processing => "processing",
            BalanceState::Paid => "paid",
        }
    }
}

/// key: payout-payment-state -> disbursement lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Created,
    Processing,
    Unclaimed,
    Completed,
    Failed,
    Cancelled,
    Returned,
}

impl PaymentState {
    pub const NON_TERMINAL: [PaymentState; 3] = [
        PaymentState::Created,
        PaymentState::Processing,
        PaymentState::Unclaimed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Created => "created",
            PaymentState::Processing => "processing",
            PaymentState::Unclaimed => "unclaimed",
            PaymentState::Completed => "completed",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !Self::NON_TERMINAL.contains(self)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentState::Cancelled | PaymentState::Failed | PaymentState::Returned
        )
    }

    /// `created -> failed` only happens when the processor rejects the submission outright.
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        match self {
            Created => matches!(next, Processing | Failed),
            Processing => matches!(next, Unclaimed | Completed | Failed | Cancelled | Returned),
            Unclaimed => matches!(next, Completed | Failed | Cancelled | Returned),
            Completed | Failed | Cancelled | Returned => false,
        }
    }

    /// What happens to the constituent balances when a payment lands in this state.
    pub fn balance_effect(&self) -> Option<BalanceState> {
        match self {
            PaymentState::Completed => Some(BalanceState::Paid),
            PaymentState::Failed | PaymentState::Cancelled | PaymentState::Returned => {
                Some(BalanceState::Unpaid)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: payout-seller -> payout preferences
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seller {
    pub id: i64,
    pub payouts_paused: bool,
    pub payout_processor: Processor,
    pub created_at: DateTime<Utc>,
}

/// key: payout-balance -> per-seller accrual row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BalanceAccount {
    pub id: Uuid,
    pub seller_id: i64,
    pub amount_cents: i64,
    pub holding_amount_cents: i64,
    pub state: BalanceState,
    pub date: NaiveDate,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BalanceAccount {
    pub fn new(seller_id: i64, amount_cents: i64, date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seller_id,
            amount_cents,
            holding_amount_cents: amount_cents,
            state: BalanceState::Unpaid,
            date,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// key: payout-payment -> disbursement attempt
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub seller_id: i64,
    pub processor: Processor,
    pub payout_period_end_date: NaiveDate,
    pub state: PaymentState,
    pub correlation_id: Option<String>,
    pub failure_reason: Option<String>,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub seller_id: i64,
    pub processor: Processor,
    pub payout_period_end_date: NaiveDate,
    pub amount_cents: i64,
    pub balance_ids: Vec<Uuid>,
}

/// Compare-and-set request applied by the store under `expected` state.
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub expected: PaymentState,
    pub next: PaymentState,
    pub correlation_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl PaymentTransition {
    pub fn new(expected: PaymentState, next: PaymentState) -> Self {
        Self {
            expected,
            next,
            correlation_id: None,
            failure_reason: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_failure_reason(mut self, failure_reason: Option<String>) -> Self {
        self.failure_reason = failure_reason;
        self
    }
}

/// key: payout-comment -> seller-facing remediation note
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentComment {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub seller_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// key: revenue-inputs -> purchase rows touching a balance
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: Uuid,
    pub product_id: i64,
    pub price_cents: i64,
    pub fee_cents: i64,
    pub affiliate_credit_cents: i64,
    pub purchase_success_balance_id: Option<Uuid>,
    pub purchase_chargeback_balance_id: Option<Uuid>,
}

/// Refund joined with the purchase it reverses.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefundRecord {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub product_id: i64,
    pub balance_id: Uuid,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub retained_fee_cents: i64,
    pub fee_waived: bool,
    pub purchase_price_cents: i64,
    pub affiliate_credit_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for state in [
            PaymentState::Completed,
            PaymentState::Failed,
            PaymentState::Cancelled,
            PaymentState::Returned,
        ] {
            assert!(state.is_terminal());
            for next in PaymentState::NON_TERMINAL {
                assert!(!state.can_transition_to(next));
            }
            assert!(!state.can_transition_to(PaymentState::Completed));
        }
    }

    #[test]
    fn created_only_moves_to_processing_or_failed() {
        assert!(PaymentState::Created.can_transition_to(PaymentState::Processing));
        assert!(PaymentState::Created.can_transition_to(PaymentState::Failed));
        assert!(!PaymentState::Created.can_transition_to(PaymentState::Completed));
        assert!(!PaymentState::Created.can_transition_to(PaymentState::Cancelled));
    }

    #[test]
    fn unclaimed_is_a_processing_sub_state() {
        assert!(PaymentState::Processing.can_transition_to(PaymentState::Unclaimed));
        assert!(PaymentState::Unclaimed.can_transition_to(PaymentState::Cancelled));
        assert!(!PaymentState::Unclaimed.can_transition_to(PaymentState::Processing));
        assert!(!PaymentState::Unclaimed.is_terminal());
    }

    #[test]
    fn capabilities_follow_processor() {
        assert!(Processor::Paypal.supports_cancel());
        assert!(Processor::Paypal.supports_sync());
        assert!(!Processor::Stripe.supports_cancel());
        assert!(!Processor::Stripe.supports_sync());
        assert_eq!(Processor::parse(" PayPal "), Some(Processor::Paypal));
        assert_eq!(Processor::parse("braintree"), None);
    }

    #[test]
    fn balances_are_released_unless_payment_completes() {
        assert_eq!(
            PaymentState::Completed.balance_effect(),
            Some(BalanceState::Paid)
        );
        assert_eq!(
            PaymentState::Returned.balance_effect(),
            Some(BalanceState::Unpaid)
        );
        assert_eq!(PaymentState::Processing.balance_effect(), None);
    }
}
