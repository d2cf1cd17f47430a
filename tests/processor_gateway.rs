use chrono::Utc;
use httpmock::prelude::*;
use payout_ledger::payouts::{
    HttpProcessorAdapter, Payment, PaymentState, ProcessorAdapter, ProcessorError,
    ProcessorStatus, Processor,
};
use serde_json::json;
use uuid::Uuid;

fn sample_payment(processor: Processor) -> Payment {
    let now = Utc::now();
    Payment {
        id: Uuid::new_v4(),
        seller_id: 42,
        processor,
        payout_period_end_date: now.date_naive(),
        state: PaymentState::Created,
        correlation_id: None,
        failure_reason: None,
        amount_cents: 5000,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn http_adapter_covers_transfer_lifecycle() {
    let server = MockServer::start_async().await;
    let payment = sample_payment(Processor::Paypal);

    let submit_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/paypal/transfers")
            .header("authorization", "Bearer gateway-token")
            .json_body_partial(r#"{"seller_id": 42, "amount_cents": 5000}"#);
        then.status(200).json_body(json!({ "provider_ref": "PP-123" }));
    });
    let status_mock = server.mock(|when, then| {
        when.method(GET).path("/paypal/transfers/PP-123");
        then.status(200)
            .json_body(json!({ "status": "returned", "failure_code": "RECEIVER_UNREGISTERED" }));
    });
    let cancel_mock = server.mock(|when, then| {
        when.method(POST).path("/paypal/transfers/PP-123/cancel");
        then.status(204);
    });

    let adapter = HttpProcessorAdapter::new(
        server.base_url(),
        Some("gateway-token".to_string()),
        Processor::Paypal,
    )
    .unwrap();

    let provider_ref = adapter.submit_transfer(&payment).await.unwrap();
    assert_eq!(provider_ref, "PP-123");
    let status = adapter.query_status(&provider_ref).await.unwrap();
    assert_eq!(
        status,
        ProcessorStatus::Returned {
            failure_code: Some("RECEIVER_UNREGISTERED".to_string())
        }
    );
    adapter.cancel_transfer(&provider_ref).await.unwrap();

    submit_mock.assert();
    status_mock.assert();
    cancel_mock.assert();
}

#[tokio::test]
async fn http_adapter_classifies_gateway_errors() {
    let server = MockServer::start_async().await;
    let payment = sample_payment(Processor::Stripe);

    server.mock(|when, then| {
        when.method(GET).path("/stripe/transfers/rate-limited");
        then.status(429).header("Retry-After", "7");
    });
    server.mock(|when, then| {
        when.method(GET).path("/stripe/transfers/down");
        then.status(503);
    });
    server.mock(|when, then| {
        when.method(POST).path("/stripe/transfers");
        then.status(422)
            .json_body(json!({ "code": "account_closed", "message": "bank account closed" }));
    });

    let adapter = HttpProcessorAdapter::new(server.base_url(), None, Processor::Stripe).unwrap();

    assert_eq!(
        adapter.query_status("rate-limited").await.unwrap_err(),
        ProcessorError::RateLimited {
            retry_after_secs: Some(7)
        }
    );
    assert!(adapter.query_status("down").await.unwrap_err().is_transient());

    let rejected = adapter.submit_transfer(&payment).await.unwrap_err();
    assert!(!rejected.is_transient());
    assert_eq!(rejected.failure_code().as_deref(), Some("account_closed"));
}
