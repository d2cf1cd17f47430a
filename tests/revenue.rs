mod support;

use payout_ledger::payouts::{
    PayoutStore, Processor, RefundRecord, RevenueReconciler, SaleRecord,
};
use support::{days_ago, Harness};
use uuid::Uuid;

fn sale(product_id: i64, price_cents: i64, fee_cents: i64, balance: Uuid) -> SaleRecord {
    SaleRecord {
        id: Uuid::new_v4(),
        product_id,
        price_cents,
        fee_cents,
        affiliate_credit_cents: 0,
        purchase_success_balance_id: Some(balance),
        purchase_chargeback_balance_id: None,
    }
}

// key: revenue-tests -> per-product revenue for a paid-out balance set
#[tokio::test]
async fn revenue_for_payment_nets_refunds_and_chargebacks() {
    let harness = Harness::new();
    harness.seller(1, Processor::Stripe).await;
    harness.seller(2, Processor::Stripe).await;
    let first = harness.balance(1, 3000, days_ago(12)).await;
    let second = harness.balance(1, 1500, days_ago(10)).await;
    let foreign = harness.balance(2, 5000, days_ago(10)).await;

    let mut with_affiliate = sale(10, 1000, 100, first);
    with_affiliate.affiliate_credit_cents = 100;
    harness.store.record_sale(&with_affiliate).await.unwrap();
    harness.store.record_sale(&sale(20, 2000, 200, second)).await.unwrap();
    harness.store.record_sale(&sale(30, 5000, 500, foreign)).await.unwrap();

    let mut disputed = sale(20, 600, 60, foreign);
    disputed.purchase_chargeback_balance_id = Some(second);
    harness.store.record_sale(&disputed).await.unwrap();

    harness
        .store
        .record_refund(&RefundRecord {
            id: Uuid::new_v4(),
            purchase_id: with_affiliate.id,
            product_id: 10,
            balance_id: second,
            amount_cents: 200,
            fee_cents: 20,
            retained_fee_cents: 0,
            fee_waived: false,
            purchase_price_cents: 1000,
            affiliate_credit_cents: 100,
        })
        .await
        .unwrap();

    let payment = harness
        .machine
        .scheduler()
        .create_payments_for_balances_up_to_date(
            days_ago(7),
            Processor::Stripe,
            &[1],
            false,
            chrono::Utc::now(),
        )
        .await
        .unwrap()
        .payments
        .remove(0);

    let reconciler = RevenueReconciler::new(harness.machine.store().clone());
    let snapshot = reconciler.revenue_for_payment(payment.id).await.unwrap();

    // 1000 - 100 - 100, less the 160 refund deduction
    assert_eq!(snapshot.get(10), 640);
    // 2000 - 200, less the 540 charged back
    assert_eq!(snapshot.get(20), 1260);
    assert_eq!(snapshot.get(30), 0);
    assert_eq!(snapshot.total(), 1900);

    let direct = reconciler.revenue_by_product(&[first]).await.unwrap();
    assert_eq!(direct.get(10), 800);
    assert!(reconciler.revenue_by_product(&[]).await.unwrap().total() == 0);
}
