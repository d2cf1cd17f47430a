use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    BalanceAccount, BalanceState, NewPayment, Payment, PaymentComment, PaymentState,
    PaymentTransition, Processor, RefundRecord, SaleRecord, Seller,
};
use super::store::{PayoutStore, StoreResult};

const PAYMENT_COLUMNS: &str = "id, seller_id, processor, payout_period_end_date, state, \
    correlation_id, failure_reason, amount_cents, created_at, updated_at";

/// key: payout-store-postgres -> sqlx-backed ledger
#[derive(Clone)]
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PayoutStore for PgPayoutStore {
    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sellers (id, payouts_paused, payout_processor, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(seller.id)
        .bind(seller.payouts_paused)
        .bind(seller.payout_processor)
        .bind(seller.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn seller(&self, seller_id: i64) -> StoreResult<Option<Seller>> {
        let seller = sqlx::query_as::<_, Seller>("SELECT * FROM sellers WHERE id = $1")
            .bind(seller_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(seller)
    }

    async fn set_payouts_paused(
        &self,
        seller_id: i64,
        paused: bool,
    ) -> StoreResult<Option<Seller>> {
        let seller = sqlx::query_as::<_, Seller>(
            "UPDATE sellers SET payouts_paused = $2 WHERE id = $1 RETURNING *",
        )
        .bind(seller_id)
        .bind(paused)
        .fetch_optional(&self.pool)
        .await?;
        Ok(seller)
    }

    async fn sellers_due_for_payout(
        &self,
        processor: Processor,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<i64>> {
        let sellers = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT s.id
            FROM sellers s
            JOIN balances b ON b.seller_id = s.id
            WHERE s.payout_processor = $1
              AND b.state = 'unpaid'
              AND b.date <= $2
            ORDER BY s.id
            "#,
        )
        .bind(processor)
        .bind(cutoff_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(sellers)
    }

    async fn insert_balance(&self, balance: &BalanceAccount) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (
                id, seller_id, amount_cents, holding_amount_cents, state, date, payment_id,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(balance.id)
        .bind(balance.seller_id)
        .bind(balance.amount_cents)
        .bind(balance.holding_amount_cents)
        .bind(balance.state)
        .bind(balance.date)
        .bind(balance.payment_id)
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn adjust_balance(
        &self,
        balance_id: Uuid,
        delta_cents: i64,
    ) -> StoreResult<Option<BalanceAccount>> {
        let balance = sqlx::query_as::<_, BalanceAccount>(
            r#"
            UPDATE balances
            SET amount_cents = amount_cents + $2,
                holding_amount_cents = holding_amount_cents + $2,
                updated_at = NOW()
            WHERE id = $1 AND state = 'unpaid'
            RETURNING *
            "#,
        )
        .bind(balance_id)
        .bind(delta_cents)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn unpaid_balances_up_to(
        &self,
        seller_id: i64,
        cutoff_date: NaiveDate,
    ) -> StoreResult<Vec<BalanceAccount>> {
        let balances = sqlx::query_as::<_, BalanceAccount>(
            "SELECT * FROM balances WHERE seller_id = $1 AND state = 'unpaid' AND date <= $2 ORDER BY date",
        )
        .bind(seller_id)
        .bind(cutoff_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(balances)
    }

    async fn balances_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<BalanceAccount>> {
        let balances = sqlx::query_as::<_, BalanceAccount>(
            "SELECT * FROM balances WHERE payment_id = $1 ORDER BY date",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(balances)
    }

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn payment_by_correlation_id(
        &self,
        processor: Processor,
        correlation_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE processor = $1 AND correlation_id = $2"
        ))
        .bind(processor)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn open_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE seller_id = $1 AND state IN ('created', 'processing', 'unclaimed') \
             LIMIT 1"
        ))
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn latest_payment_for_seller(&self, seller_id: i64) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE seller_id = $1 \
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        ))
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn payments_for_seller(&self, seller_id: i64) -> StoreResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE seller_id = $1 \
             ORDER BY created_at DESC, seq DESC"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn stale_payments(
        &self,
        processor: Processor,
        states: &[PaymentState],
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE processor = $1 AND state::text = ANY($2) AND updated_at <= $3 \
             ORDER BY updated_at"
        ))
        .bind(processor)
        .bind(&states)
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn create_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;

        let claimed: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT id, amount_cents FROM balances
            WHERE id = ANY($1) AND seller_id = $2 AND state = 'unpaid'
            FOR UPDATE
            "#,
        )
        .bind(&payment.balance_ids)
        .bind(payment.seller_id)
        .fetch_all(&mut tx)
        .await?;
        let claimed_cents: i64 = claimed.iter().map(|(_, amount_cents)| amount_cents).sum();
        // an adjustment since the scheduler's read invalidates its amount
        if claimed.len() != payment.balance_ids.len() || claimed_cents != payment.amount_cents {
            tx.rollback().await?;
            return Ok(None);
        }

        // payments_one_open_per_seller turns a racing insert into a no-op
        let record = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (
                id, seller_id, processor, payout_period_end_date, state, amount_cents,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'created', $5, $6, $6)
            ON CONFLICT DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(payment.seller_id)
        .bind(payment.processor)
        .bind(payment.payout_period_end_date)
        .bind(payment.amount_cents)
        .bind(now)
        .fetch_optional(&mut tx)
        .await?;
        let Some(record) = record else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE balances SET state = 'processing', payment_id = $2, updated_at = $3 WHERE id = ANY($1)",
        )
        .bind(&payment.balance_ids)
        .bind(record.id)
        .bind(now)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record))
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: PaymentTransition,
    ) -> StoreResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;
        let record = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET state = $3,
                correlation_id = COALESCE($4, correlation_id),
                failure_reason = COALESCE($5, failure_reason),
                updated_at = NOW()
            WHERE id = $1 AND state = $2
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment_id)
        .bind(transition.expected)
        .bind(transition.next)
        .bind(&transition.correlation_id)
        .bind(&transition.failure_reason)
        .fetch_optional(&mut tx)
        .await?;
        let Some(record) = record else {
            tx.rollback().await?;
            return Ok(None);
        };

        if let Some(balance_state) = transition.next.balance_effect() {
            sqlx::query(
                "UPDATE balances SET state = $2, updated_at = NOW() WHERE payment_id = $1 AND state = $3",
            )
            .bind(payment_id)
            .bind(balance_state)
            .bind(BalanceState::Processing)
            .execute(&mut tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(record))
    }

    async fn insert_comment_once(
        &self,
        payment_id: Uuid,
        seller_id: i64,
        body: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_comments (id, payment_id, seller_id, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(seller_id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn comments_for_payment(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentComment>> {
        let comments = sqlx::query_as::<_, PaymentComment>(
            "SELECT * FROM payment_comments WHERE payment_id = $1 ORDER BY created_at",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    async fn record_sale(&self, sale: &SaleRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, product_id, price_cents, fee_cents, affiliate_credit_cents,
                purchase_success_balance_id, purchase_chargeback_balance_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(sale.id)
        .bind(sale.product_id)
        .bind(sale.price_cents)
        .bind(sale.fee_cents)
        .bind(sale.affiliate_credit_cents)
        .bind(sale.purchase_success_balance_id)
        .bind(sale.purchase_chargeback_balance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_refund(&self, refund: &RefundRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, purchase_id, balance_id, amount_cents, fee_cents, retained_fee_cents, fee_waived
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(refund.id)
        .bind(refund.purchase_id)
        .bind(refund.balance_id)
        .bind(refund.amount_cents)
        .bind(refund.fee_cents)
        .bind(refund.retained_fee_cents)
        .bind(refund.fee_waived)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sales_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<SaleRecord>> {
        let sales = sqlx::query_as::<_, SaleRecord>(
            r#"
            SELECT id, product_id, price_cents, fee_cents, affiliate_credit_cents,
                   purchase_success_balance_id, purchase_chargeback_balance_id
            FROM purchases
            WHERE purchase_success_balance_id = ANY($1)
               OR purchase_chargeback_balance_id = ANY($1)
            "#,
        )
        .bind(balance_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }

    async fn refunds_for_balances(&self, balance_ids: &[Uuid]) -> StoreResult<Vec<RefundRecord>> {
        let refunds = sqlx::query_as::<_, RefundRecord>(
            r#"
            SELECT r.id, r.purchase_id, p.product_id, r.balance_id, r.amount_cents, r.fee_cents,
                   r.retained_fee_cents, r.fee_waived, p.price_cents AS purchase_price_cents,
                   p.affiliate_credit_cents
            FROM refunds r
            JOIN purchases p ON p.id = r.purchase_id
            WHERE r.balance_id = ANY($1)
            "#,
        )
        .bind(balance_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(refunds)
    }
}
