use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::error::{PayoutError, PayoutResult};
use super::models::{RefundRecord, SaleRecord};
use super::store::PayoutStore;

/// Net revenue per product; products without entries read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevenueSnapshot {
    by_product: BTreeMap<i64, i64>,
}

impl RevenueSnapshot {
    pub fn get(&self, product_id: i64) -> i64 {
        self.by_product.get(&product_id).copied().unwrap_or(0)
    }

    /// Saturates rather than wrapping when products together exceed `i64`.
    pub fn total(&self) -> i64 {
        self.by_product
            .values()
            .fold(0i64, |total, cents| total.saturating_add(*cents))
    }

    pub fn products(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.by_product.iter().map(|(product, cents)| (*product, *cents))
    }

    pub fn into_map(self) -> BTreeMap<i64, i64> {
        self.by_product
    }

    fn add(&mut self, product_id: i64, cents: i64) -> PayoutResult<()> {
        let entry = self.by_product.entry(product_id).or_insert(0);
        *entry = entry
            .checked_add(cents)
            .ok_or_else(|| overflow(format!("revenue for product {product_id}")))?;
        Ok(())
    }
}

fn overflow(what: impl std::fmt::Display) -> PayoutError {
    PayoutError::invariant(format!("{what} overflows i64 cents"))
}

fn negate(cents: i64) -> PayoutResult<i64> {
    cents.checked_neg().ok_or_else(|| overflow("negated amount"))
}

fn sale_net_cents(sale: &SaleRecord) -> PayoutResult<i64> {
    sale.price_cents
        .checked_sub(sale.fee_cents)
        .and_then(|net| net.checked_sub(sale.affiliate_credit_cents))
        .ok_or_else(|| overflow(format!("net of sale {}", sale.id)))
}

/// Affiliate credit attributable to the refunded share of the purchase, truncated.
fn prorated_affiliate_credit(refund: &RefundRecord) -> PayoutResult<i64> {
    if refund.purchase_price_cents == 0 {
        return Ok(0);
    }
    let prorated = i128::from(refund.affiliate_credit_cents) * i128::from(refund.amount_cents)
        / i128::from(refund.purchase_price_cents);
    i64::try_from(prorated)
        .map_err(|_| overflow(format!("affiliate share of refund {}", refund.id)))
}

/// Amount a refund takes back from seller revenue.
pub fn refund_deduction_cents(refund: &RefundRecord) -> PayoutResult<i64> {
    let affiliate_share = prorated_affiliate_credit(refund)?;
    let gross = refund.amount_cents.checked_sub(refund.fee_cents);
    let gross = if refund.fee_waived {
        gross
    } else {
        gross.and_then(|cents| cents.checked_add(refund.retained_fee_cents))
    };
    gross
        .and_then(|cents| cents.checked_sub(affiliate_share))
        .ok_or_else(|| overflow(format!("deduction of refund {}", refund.id)))
}

/// key: revenue-reconciler -> sales net of chargebacks and refunds, grouped by product
pub fn revenue_by_product(
    balance_ids: &HashSet<Uuid>,
    sales: &[SaleRecord],
    refunds: &[RefundRecord],
) -> PayoutResult<RevenueSnapshot> {
    let in_set = |id: Option<Uuid>| id.map(|id| balance_ids.contains(&id)).unwrap_or(false);
    let mut snapshot = RevenueSnapshot::default();

    for sale in sales {
        if in_set(sale.purchase_success_balance_id) {
            snapshot.add(sale.product_id, sale_net_cents(sale)?)?;
        }
        if in_set(sale.purchase_chargeback_balance_id) {
            snapshot.add(sale.product_id, negate(sale_net_cents(sale)?)?)?;
        }
    }

    for refund in refunds.iter().filter(|r| balance_ids.contains(&r.balance_id)) {
        snapshot.add(refund.product_id, negate(refund_deduction_cents(refund)?)?)?;
    }

    Ok(snapshot)
}

/// Seller-level net revenue over the same inputs, without grouping.
pub fn net_revenue_total(
    balance_ids: &HashSet<Uuid>,
    sales: &[SaleRecord],
    refunds: &[RefundRecord],
) -> PayoutResult<i64> {
    let in_set = |id: Option<Uuid>| id.map(|id| balance_ids.contains(&id)).unwrap_or(false);
    let mut total: i64 = 0;
    let mut credit = |cents: i64, what: &str| -> PayoutResult<()> {
        total = total
            .checked_add(cents)
            .ok_or_else(|| overflow(format!("seller revenue after {what}")))?;
        Ok(())
    };
    for sale in sales {
        if in_set(sale.purchase_success_balance_id) {
            credit(sale_net_cents(sale)?, "sales")?;
        }
        if in_set(sale.purchase_chargeback_balance_id) {
            credit(negate(sale_net_cents(sale)?)?, "chargebacks")?;
        }
    }
    for refund in refunds.iter().filter(|r| balance_ids.contains(&r.balance_id)) {
        credit(negate(refund_deduction_cents(refund)?)?, "refunds")?;
    }
    Ok(total)
}

/// Loads revenue inputs for a balance set from the store.
#[derive(Clone)]
pub struct RevenueReconciler {
    store: Arc<dyn PayoutStore>,
}

impl RevenueReconciler {
    pub fn new(store: Arc<dyn PayoutStore>) -> Self {
        Self { store }
    }

    pub async fn revenue_by_product(&self, balance_ids: &[Uuid]) -> PayoutResult<RevenueSnapshot> {
        let set: HashSet<Uuid> = balance_ids.iter().copied().collect();
        if set.is_empty() {
            return Ok(RevenueSnapshot::default());
        }
        let ids: Vec<Uuid> = set.iter().copied().collect();
        let sales = self.store.sales_for_balances(&ids).await?;
        let refunds = self.store.refunds_for_balances(&ids).await?;
        revenue_by_product(&set, &sales, &refunds)
    }

    pub async fn revenue_for_payment(&self, payment_id: Uuid) -> PayoutResult<RevenueSnapshot> {
        let balances = self.store.balances_for_payment(payment_id).await?;
        let ids: Vec<Uuid> = balances.iter().map(|balance| balance.id).collect();
        self.revenue_by_product(&ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(product_id: i64, price: i64, fee: i64, affiliate: i64) -> SaleRecord {
        SaleRecord {
            id: Uuid::new_v4(),
            product_id,
            price_cents: price,
            fee_cents: fee,
            affiliate_credit_cents: affiliate,
            purchase_success_balance_id: None,
            purchase_chargeback_balance_id: None,
        }
    }

    fn refund(product_id: i64, balance_id: Uuid, amount: i64, fee: i64) -> RefundRecord {
        RefundRecord {
            id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            product_id,
            balance_id,
            amount_cents: amount,
            fee_cents: fee,
            retained_fee_cents: 0,
            fee_waived: false,
            purchase_price_cents: 1000,
            affiliate_credit_cents: 100,
        }
    }

    #[test]
    fn partial_refund_prorates_affiliate_credit() {
        let balance = Uuid::new_v4();
        let r = refund(7, balance, 200, 20);
        assert_eq!(refund_deduction_cents(&r).unwrap(), 160);

        let set = HashSet::from([balance]);
        let snapshot = revenue_by_product(&set, &[], &[r]).unwrap();
        assert_eq!(snapshot.get(7), -160);
    }

    #[test]
    fn retained_fee_only_counts_when_fee_not_waived() {
        let balance = Uuid::new_v4();
        let mut r = refund(1, balance, 500, 50);
        r.retained_fee_cents = 30;
        // 500 - 50 + 30 - floor(100 * 500 / 1000)
        assert_eq!(refund_deduction_cents(&r).unwrap(), 430);

        r.fee_waived = true;
        assert_eq!(refund_deduction_cents(&r).unwrap(), 400);
    }

    #[test]
    fn affiliate_proration_truncates() {
        let balance = Uuid::new_v4();
        let mut r = refund(1, balance, 333, 0);
        r.affiliate_credit_cents = 101;
        // 101 * 333 / 1000 = 33.633 -> 33
        assert_eq!(refund_deduction_cents(&r).unwrap(), 300);
    }

    #[test]
    fn zero_price_purchase_prorates_nothing() {
        let mut r = refund(1, Uuid::new_v4(), 0, 0);
        r.purchase_price_cents = 0;
        assert_eq!(refund_deduction_cents(&r).unwrap(), 0);
    }

    #[test]
    fn chargebacks_and_foreign_balances() {
        let ours = Uuid::new_v4();
        let theirs = Uuid::new_v4();

        let mut paid = sale(1, 1000, 100, 50);
        paid.purchase_success_balance_id = Some(ours);
        let mut disputed = sale(1, 400, 40, 0);
        disputed.purchase_success_balance_id = Some(theirs);
        disputed.purchase_chargeback_balance_id = Some(ours);
        let mut elsewhere = sale(2, 900, 90, 0);
        elsewhere.purchase_success_balance_id = Some(theirs);

        let set = HashSet::from([ours]);
        let sales = [paid, disputed, elsewhere];
        let snapshot = revenue_by_product(&set, &sales, &[]).unwrap();

        assert_eq!(snapshot.get(1), 850 - 360);
        assert_eq!(snapshot.get(2), 0);
        assert_eq!(snapshot.products().count(), 1);
    }

    #[test]
    fn per_product_sum_matches_seller_total() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outside = Uuid::new_v4();

        let mut s1 = sale(1, 1000, 100, 100);
        s1.purchase_success_balance_id = Some(a);
        let mut s2 = sale(2, 2500, 250, 0);
        s2.purchase_success_balance_id = Some(b);
        let mut s3 = sale(2, 700, 70, 35);
        s3.purchase_success_balance_id = Some(a);
        s3.purchase_chargeback_balance_id = Some(b);
        let mut s4 = sale(3, 1200, 120, 0);
        s4.purchase_success_balance_id = Some(outside);

        let mut r1 = refund(1, b, 200, 20);
        r1.retained_fee_cents = 10;
        let mut r2 = refund(2, a, 1250, 125);
        r2.fee_waived = true;
        r2.purchase_price_cents = 2500;
        r2.affiliate_credit_cents = 0;
        let r3 = refund(3, outside, 600, 60);

        let set = HashSet::from([a, b]);
        let sales = [s1, s2, s3, s4];
        let refunds = [r1, r2, r3];
        let snapshot = revenue_by_product(&set, &sales, &refunds).unwrap();

        assert_eq!(snapshot.total(), net_revenue_total(&set, &sales, &refunds).unwrap());
        assert_eq!(snapshot.get(3), 0);
    }

    #[test]
    fn overflowing_amounts_are_invariant_violations() {
        let balance = Uuid::new_v4();
        let mut huge = sale(1, i64::MIN, 1, 0);
        huge.purchase_success_balance_id = Some(balance);
        let set = HashSet::from([balance]);
        let err = revenue_by_product(&set, &[huge], &[]).unwrap_err();
        assert!(matches!(err, PayoutError::InvariantViolation(_)));

        let mut r = refund(1, balance, i64::MAX, 0);
        r.affiliate_credit_cents = i64::MAX;
        r.purchase_price_cents = 1;
        assert!(matches!(
            refund_deduction_cents(&r),
            Err(PayoutError::InvariantViolation(_))
        ));
        assert!(net_revenue_total(&set, &[], &[r]).is_err());
    }
}
