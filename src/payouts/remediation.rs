use super::models::Processor;

/// key: payout-remediation -> (processor, failure code) -> seller guidance
///
/// Codes not listed here are surfaced as `failure_reason` only and never produce a comment.
const REMEDIATIONS: &[(Processor, &str, &str)] = &[
    (
        Processor::Stripe,
        "account_closed",
        "Your bank account has been closed. Please add a new bank account in your payout settings.",
    ),
    (
        Processor::Stripe,
        "account_frozen",
        "Your bank account is frozen. Please contact your bank or add a different account in your payout settings.",
    ),
    (
        Processor::Stripe,
        "bank_account_restricted",
        "Your bank account has restrictions that prevent deposits. Please contact your bank or use a different account.",
    ),
    (
        Processor::Stripe,
        "invalid_account_number",
        "The account number on file is invalid. Please double-check your bank details in your payout settings.",
    ),
    (
        Processor::Stripe,
        "incorrect_account_holder_name",
        "The account holder name does not match your bank's records. Please update it in your payout settings.",
    ),
    (
        Processor::Stripe,
        "no_account",
        "We could not find a bank account with the details provided. Please update your payout settings.",
    ),
    (
        Processor::Stripe,
        "unsupported_card",
        "Your debit card does not support instant payouts. Please add a bank account or a different debit card.",
    ),
    (
        Processor::Paypal,
        "RECEIVER_UNREGISTERED",
        "The PayPal address on file is not registered. Please create a PayPal account with that email or update your payout email.",
    ),
    (
        Processor::Paypal,
        "RECEIVER_UNCONFIRMED",
        "Your PayPal account email is unconfirmed. Please confirm it with PayPal so payouts can be delivered.",
    ),
    (
        Processor::Paypal,
        "RECEIVER_ACCOUNT_LOCKED",
        "Your PayPal account is locked or inactive. Please contact PayPal to restore it, then ask us to retry.",
    ),
    (
        Processor::Paypal,
        "RECEIVER_COUNTRY_NOT_ALLOWED",
        "PayPal cannot deliver payouts to your account's country. Please switch to bank payouts.",
    ),
    (
        Processor::Paypal,
        "RECEIVER_YOUTH_ACCOUNT",
        "PayPal youth accounts cannot receive payouts. Please use a different PayPal account.",
    ),
];

pub fn remediation_for(processor: Processor, code: &str) -> Option<&'static str> {
    REMEDIATIONS
        .iter()
        .find(|(candidate, candidate_code, _)| *candidate == processor && *candidate_code == code)
        .map(|(_, _, text)| *text)
}
