use chrono::Duration;
use once_cell::sync::Lazy;

use crate::payouts::{PayoutPolicy, Processor};

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Shared secret for processor webhook signatures (`x-payout-signature`).
pub static PAYOUT_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYOUT_WEBHOOK_SECRET").expect("PAYOUT_WEBHOOK_SECRET must be set")
});

/// Base URL of the processor gateway sidecar.
pub static PROCESSOR_GATEWAY_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("PROCESSOR_GATEWAY_URL").unwrap_or_else(|| "http://127.0.0.1:8787".into())
});

/// Optional bearer token presented to the processor gateway.
pub static PROCESSOR_GATEWAY_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PROCESSOR_GATEWAY_TOKEN"));

/// key: payout-config -> sweep cadence
pub static PAYOUT_SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PAYOUT_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// key: payout-config -> days between today and the sweep's cutoff date
pub static PAYOUT_CUTOFF_LAG_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("PAYOUT_CUTOFF_LAG_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(7)
});

/// Processors the sweep iterates. Comma-separated, e.g. `stripe,paypal`.
pub static PAYOUT_PROCESSORS: Lazy<Vec<Processor>> =
    Lazy::new(|| parse_processors(std::env::var("PAYOUT_PROCESSORS").ok().as_deref()));

pub static PAYOUT_POLICY: Lazy<PayoutPolicy> = Lazy::new(payout_policy_from_env);

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_i64_env(key: &str) -> Option<i64> {
    read_optional_env(key).and_then(|value| value.parse::<i64>().ok())
}

pub fn parse_processors(raw: Option<&str>) -> Vec<Processor> {
    let parsed: Vec<Processor> = raw
        .map(|value| {
            value
                .split(',')
                .filter_map(|item| {
                    let trimmed = item.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    let processor = Processor::parse(trimmed);
                    if processor.is_none() {
                        tracing::warn!(value = trimmed, "ignoring unknown payout processor");
                    }
                    processor
                })
                .fold(Vec::new(), |mut acc, processor| {
                    if !acc.contains(&processor) {
                        acc.push(processor);
                    }
                    acc
                })
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        Processor::ALL.to_vec()
    } else {
        parsed
    }
}

pub fn payout_policy_from_env() -> PayoutPolicy {
    let defaults = PayoutPolicy::default();
    PayoutPolicy {
        stripe_minimum_cents: read_i64_env("PAYOUT_STRIPE_MINIMUM_CENTS")
            .filter(|value| *value >= 0)
            .unwrap_or(defaults.stripe_minimum_cents),
        paypal_minimum_cents: read_i64_env("PAYOUT_PAYPAL_MINIMUM_CENTS")
            .filter(|value| *value >= 0)
            .unwrap_or(defaults.paypal_minimum_cents),
        admin_fail_min_age: read_i64_env("PAYOUT_ADMIN_FAIL_MIN_AGE_DAYS")
            .filter(|value| *value >= 0)
            .map(Duration::days)
            .unwrap_or(defaults.admin_fail_min_age),
        sync_stale_after: read_i64_env("PAYOUT_SYNC_STALE_AFTER_HOURS")
            .filter(|value| *value > 0)
            .map(Duration::hours)
            .unwrap_or(defaults.sync_stale_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processors_default_to_all() {
        assert_eq!(parse_processors(None), Processor::ALL.to_vec());
        assert_eq!(parse_processors(Some(" , ")), Processor::ALL.to_vec());
    }

    #[test]
    fn processors_parse_and_dedupe() {
        assert_eq!(
            parse_processors(Some("PayPal, stripe ,paypal,venmo")),
            vec![Processor::Paypal, Processor::Stripe]
        );
    }
}
