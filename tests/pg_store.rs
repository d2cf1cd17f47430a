use chrono::{Duration, Utc};
use payout_ledger::payouts::{
    BalanceAccount, BalanceState, NewPayment, PaymentState, PaymentTransition, PayoutStore,
    PgPayoutStore, Processor, Seller,
};
use sqlx::PgPool;

async fn store_with_seller(pool: PgPool, seller_id: i64) -> PgPayoutStore {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgPayoutStore::new(pool);
    store
        .insert_seller(&Seller {
            id: seller_id,
            payouts_paused: false,
            payout_processor: Processor::Paypal,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
}

// key: payout-store-postgres-tests -> claim and transition semantics in SQL
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn create_payment_claims_balances_once(pool: PgPool) {
    let store = store_with_seller(pool, 1).await;
    let date = (Utc::now() - Duration::days(10)).date_naive();
    let balance = BalanceAccount::new(1, 4200, date);
    store.insert_balance(&balance).await.unwrap();

    let request = NewPayment {
        seller_id: 1,
        processor: Processor::Paypal,
        payout_period_end_date: date,
        amount_cents: 4200,
        balance_ids: vec![balance.id],
    };
    let payment = store
        .create_payment(request.clone(), Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Created);

    assert!(store
        .create_payment(request, Utc::now())
        .await
        .unwrap()
        .is_none());
    let claimed = store.balances_for_payment(payment.id).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].state, BalanceState::Processing);
    assert_eq!(
        store.open_payment_for_seller(1).await.unwrap().unwrap().id,
        payment.id
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn transition_is_compare_and_set(pool: PgPool) {
    let store = store_with_seller(pool, 2).await;
    let date = (Utc::now() - Duration::days(10)).date_naive();
    let balance = BalanceAccount::new(2, 1500, date);
    store.insert_balance(&balance).await.unwrap();
    let payment = store
        .create_payment(
            NewPayment {
                seller_id: 2,
                processor: Processor::Paypal,
                payout_period_end_date: date,
                amount_cents: 1500,
                balance_ids: vec![balance.id],
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();

    let submitted = store
        .transition_payment(
            payment.id,
            PaymentTransition::new(PaymentState::Created, PaymentState::Processing)
                .with_correlation_id("PP-9"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submitted.correlation_id.as_deref(), Some("PP-9"));

    let stale = store
        .transition_payment(
            payment.id,
            PaymentTransition::new(PaymentState::Created, PaymentState::Failed),
        )
        .await
        .unwrap();
    assert!(stale.is_none());

    store
        .transition_payment(
            payment.id,
            PaymentTransition::new(PaymentState::Processing, PaymentState::Completed),
        )
        .await
        .unwrap()
        .unwrap();
    let paid = store.balances_for_payment(payment.id).await.unwrap();
    assert_eq!(paid[0].state, BalanceState::Paid);
    assert_eq!(
        store
            .payment_by_correlation_id(Processor::Paypal, "PP-9")
            .await
            .unwrap()
            .unwrap()
            .state,
        PaymentState::Completed
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn comments_are_posted_once(pool: PgPool) {
    let store = store_with_seller(pool, 3).await;
    let date = (Utc::now() - Duration::days(10)).date_naive();
    let balance = BalanceAccount::new(3, 1500, date);
    store.insert_balance(&balance).await.unwrap();
    let payment = store
        .create_payment(
            NewPayment {
                seller_id: 3,
                processor: Processor::Paypal,
                payout_period_end_date: date,
                amount_cents: 1500,
                balance_ids: vec![balance.id],
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();

    assert!(store.insert_comment_once(payment.id, 3, "first").await.unwrap());
    assert!(!store.insert_comment_once(payment.id, 3, "second").await.unwrap());
    let comments = store.comments_for_payment(payment.id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].body, "first");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn create_payment_rejects_stale_amount(pool: PgPool) {
    let store = store_with_seller(pool, 4).await;
    let date = (Utc::now() - Duration::days(10)).date_naive();
    let first = BalanceAccount::new(4, 3000, date);
    let second = BalanceAccount::new(4, 2000, date);
    store.insert_balance(&first).await.unwrap();
    store.insert_balance(&second).await.unwrap();

    store.adjust_balance(first.id, -4500).await.unwrap().unwrap();
    let request = NewPayment {
        seller_id: 4,
        processor: Processor::Paypal,
        payout_period_end_date: date,
        amount_cents: 5000,
        balance_ids: vec![first.id, second.id],
    };
    assert!(store
        .create_payment(request.clone(), Utc::now())
        .await
        .unwrap()
        .is_none());
    assert!(store.open_payment_for_seller(4).await.unwrap().is_none());

    let payment = store
        .create_payment(
            NewPayment {
                amount_cents: 500,
                ..request
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.amount_cents, 500);
}
