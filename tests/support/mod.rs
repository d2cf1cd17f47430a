#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use payout_ledger::payouts::{
    AdapterRegistry, BalanceAccount, DisbursementStateMachine, MemoryPayoutStore, Payment,
    PayoutPolicy, PayoutStore, ProcessorAdapter, ProcessorError, ProcessorStatus, ProviderRef,
    Processor, Seller,
};
use uuid::Uuid;

/// Adapter that replays queued responses; empty queues fall back to success.
#[derive(Default)]
pub struct ScriptedAdapter {
    submits: Mutex<VecDeque<Result<ProviderRef, ProcessorError>>>,
    statuses: Mutex<VecDeque<Result<ProcessorStatus, ProcessorError>>>,
    cancels: Mutex<VecDeque<Result<(), ProcessorError>>>,
    pub submit_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn push_submit(&self, result: Result<ProviderRef, ProcessorError>) {
        self.submits.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: Result<ProcessorStatus, ProcessorError>) {
        self.statuses.lock().unwrap().push_back(result);
    }

    pub fn push_cancel(&self, result: Result<(), ProcessorError>) {
        self.cancels.lock().unwrap().push_back(result);
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessorAdapter for ScriptedAdapter {
    async fn submit_transfer(&self, payment: &Payment) -> Result<ProviderRef, ProcessorError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.submits.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("tr_{}", payment.id.simple())))
    }

    async fn query_status(&self, _provider_ref: &str) -> Result<ProcessorStatus, ProcessorError> {
        let scripted = self.statuses.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(ProcessorStatus::Pending))
    }

    async fn cancel_transfer(&self, _provider_ref: &str) -> Result<(), ProcessorError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.cancels.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

pub fn permanent(code: &str) -> ProcessorError {
    ProcessorError::InvalidRequest {
        code: Some(code.to_string()),
        message: "rejected".to_string(),
    }
}

pub fn transient() -> ProcessorError {
    ProcessorError::Unavailable("gateway timeout".to_string())
}

pub fn days_ago(days: i64) -> NaiveDate {
    (Utc::now() - Duration::days(days)).date_naive()
}

pub struct Harness {
    pub store: Arc<MemoryPayoutStore>,
    pub stripe: Arc<ScriptedAdapter>,
    pub paypal: Arc<ScriptedAdapter>,
    pub machine: Arc<DisbursementStateMachine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(PayoutPolicy::default())
    }

    pub fn with_policy(policy: PayoutPolicy) -> Self {
        let store = Arc::new(MemoryPayoutStore::new());
        let stripe = Arc::new(ScriptedAdapter::default());
        let paypal = Arc::new(ScriptedAdapter::default());
        let adapters = AdapterRegistry::new()
            .with(Processor::Stripe, stripe.clone())
            .with(Processor::Paypal, paypal.clone());
        let dyn_store: Arc<dyn PayoutStore> = store.clone();
        let machine = Arc::new(DisbursementStateMachine::new(dyn_store, adapters, policy));
        Self {
            store,
            stripe,
            paypal,
            machine,
        }
    }

    pub async fn seller(&self, id: i64, processor: Processor) {
        self.store
            .insert_seller(&Seller {
                id,
                payouts_paused: false,
                payout_processor: processor,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    pub async fn balance(&self, seller_id: i64, amount_cents: i64, date: NaiveDate) -> Uuid {
        let balance = BalanceAccount::new(seller_id, amount_cents, date);
        self.store.insert_balance(&balance).await.unwrap();
        balance.id
    }

    /// Seller with one eligible balance, bundled into a `created` payment.
    pub async fn created_payment(
        &self,
        seller_id: i64,
        processor: Processor,
        amount_cents: i64,
        created_days_ago: i64,
    ) -> Payment {
        self.seller(seller_id, processor).await;
        self.balance(seller_id, amount_cents, days_ago(created_days_ago + 10))
            .await;
        let now = Utc::now() - Duration::days(created_days_ago);
        let run = self
            .machine
            .scheduler()
            .create_payments_for_balances_up_to_date(
                days_ago(created_days_ago + 7),
                processor,
                &[seller_id],
                false,
                now,
            )
            .await
            .unwrap();
        run.payments.into_iter().next().expect("payment created")
    }

    /// Same as `created_payment`, then submitted to the processor.
    pub async fn processing_payment(
        &self,
        seller_id: i64,
        processor: Processor,
        amount_cents: i64,
        created_days_ago: i64,
    ) -> Payment {
        let payment = self
            .created_payment(seller_id, processor, amount_cents, created_days_ago)
            .await;
        self.machine
            .submit(payment.id)
            .await
            .unwrap()
            .into_payment()
    }

    pub async fn payment(&self, payment_id: Uuid) -> Payment {
        self.store.payment(payment_id).await.unwrap().unwrap()
    }
}
