use chrono::Duration;

use super::models::Processor;

/// key: payout-policy -> thresholds shared by the sweep and admin overrides
#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    pub stripe_minimum_cents: i64,
    pub paypal_minimum_cents: i64,
    pub admin_fail_min_age: Duration,
    pub sync_stale_after: Duration,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            stripe_minimum_cents: 1000,
            paypal_minimum_cents: 1000,
            admin_fail_min_age: Duration::days(2),
            sync_stale_after: Duration::hours(24),
        }
    }
}

impl PayoutPolicy {
    pub fn minimum_payout_cents(&self, processor: Processor) -> i64 {
        match processor {
            Processor::Stripe => self.stripe_minimum_cents,
            Processor::Paypal => self.paypal_minimum_cents,
        }
    }
}
