use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::coerce;
use crate::domain::order::{LineItem, Order, OrderError, Payment, MAX_AMOUNT};
use crate::metrics::Metrics;
use crate::store::{OrderStore, Write, WriteBatch};

/// Pre-discount subtotal and summed line discounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
}

impl Totals {
    pub fn final_payable(&self) -> Decimal {
        self.subtotal - self.discount_total
    }
}

/// Discount of one line: `quantity × unit price × discount% / 100`.
pub fn line_discount(item: &LineItem) -> Decimal {
    item.gross().saturating_mul(coerce::discount_percent(item.discount_percent)) / Decimal::ONE_HUNDRED
}

fn add_amount(acc: Decimal, amount: Decimal) -> Result<Decimal, OrderError> {
    acc.checked_add(amount)
        .filter(|sum| *sum <= MAX_AMOUNT)
        .ok_or(OrderError::AmountOutOfRange)
}

/// Totals over the active items. An empty set is zero; a sum beyond the
/// storable range is `AmountOutOfRange`.
pub fn totals(items: &[LineItem]) -> Result<Totals, OrderError> {
    items
        .iter()
        .filter(|item| item.active)
        .try_fold(Totals::default(), |acc, item| {
            Ok(Totals {
                subtotal: add_amount(acc.subtotal, item.gross())?,
                discount_total: add_amount(acc.discount_total, line_discount(item))?,
            })
        })
}

/// Sum of every payment, bounded like `totals`.
pub fn paid_total(payments: &[Payment]) -> Result<Decimal, OrderError> {
    payments
        .iter()
        .try_fold(Decimal::ZERO, |acc, payment| add_amount(acc, payment.amount))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// Totals now reflect the line items.
    Recomputed { totals: Totals, changed: bool },
    /// The order has payments; stored totals were left alone.
    Protected { totals: Totals },
}

impl RecomputeOutcome {
    pub fn totals(&self) -> Totals {
        match self {
            RecomputeOutcome::Recomputed { totals, .. } | RecomputeOutcome::Protected { totals } => *totals,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.totals().subtotal
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, RecomputeOutcome::Protected { .. })
    }
}

/// Decide what the totals of `order` should be, given its current items.
///
/// Orders that have received payment keep their stored totals unless
/// `force` is set.
pub fn evaluate(order: &Order, items: &[LineItem], force: bool) -> Result<RecomputeOutcome, OrderError> {
    let stored = Totals {
        subtotal: order.subtotal,
        discount_total: order.discount_total,
    };
    if order.has_payments() && !force {
        return Ok(RecomputeOutcome::Protected { totals: stored });
    }
    let computed = totals(items)?;
    Ok(RecomputeOutcome::Recomputed {
        totals: computed,
        changed: computed != stored,
    })
}

// ============================================================================
// Financial Calculator
// ============================================================================

pub struct FinancialCalculator {
    store: Arc<dyn OrderStore>,
    metrics: Arc<Metrics>,
}

impl FinancialCalculator {
    pub fn new(store: Arc<dyn OrderStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Evaluate the totals of `order` against `items` and stage the
    /// `subtotal`/`discount_total` write in `batch` when they differ.
    pub fn stage(
        &self,
        order: &Order,
        items: &[LineItem],
        force: bool,
        batch: &mut WriteBatch,
    ) -> Result<RecomputeOutcome, OrderError> {
        let outcome = evaluate(order, items, force)?;
        match outcome {
            RecomputeOutcome::Protected { .. } => {
                tracing::debug!(
                    order_id = %order.id,
                    paid_amount = %order.paid_amount,
                    "Order has payments, totals protected"
                );
                self.metrics.record_recompute("protected");
            }
            RecomputeOutcome::Recomputed { totals, changed } => {
                if changed {
                    batch.push(Write::Totals {
                        order_id: order.id,
                        subtotal: totals.subtotal,
                        discount_total: totals.discount_total,
                    });
                    tracing::info!(
                        order_id = %order.id,
                        subtotal = %totals.subtotal,
                        discount_total = %totals.discount_total,
                        forced = force,
                        "Order totals recomputed"
                    );
                } else {
                    tracing::debug!(order_id = %order.id, "Order totals unchanged");
                }
                self.metrics.record_recompute("recomputed");
            }
        }
        Ok(outcome)
    }

    /// Bring the stored totals in line with the active line items. Only
    /// `subtotal` and `discount_total` are written, and only when they differ.
    pub async fn recompute(&self, order_id: Uuid, force: bool) -> Result<RecomputeOutcome, OrderError> {
        let order = self.store.require_order(order_id).await?;
        let items = self.store.items(order_id).await?;

        let mut batch = WriteBatch::new();
        let outcome = self.stage(&order, &items, force, &mut batch)?;
        if !batch.is_empty() {
            self.store.commit(batch).await?;
        }
        Ok(outcome)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LineItemDraft, NewOrder, OrderTypeTag, PaymentMethod};
    use crate::store::{InMemoryStore, StoreError};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    async fn setup(drafts: Vec<LineItemDraft>) -> (Arc<InMemoryStore>, FinancialCalculator, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let order = Order::create(&NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Products])).unwrap();
        store.insert_order(&order).await.unwrap();
        for draft in drafts {
            store.insert_item(&LineItem::new(order.id, draft)).await.unwrap();
        }
        let calculator = FinancialCalculator::new(store.clone(), Arc::new(Metrics::new().unwrap()));
        (store, calculator, order.id)
    }

    fn draft(quantity: Decimal, price: Decimal, discount: Decimal) -> LineItemDraft {
        LineItemDraft::new(Uuid::new_v4(), "Fabric", quantity, price, discount)
    }

    async fn pay(store: &InMemoryStore, order_id: Uuid, amount: Decimal) -> Payment {
        let payment = Payment::new(order_id, amount, PaymentMethod::Cash, None);
        store.insert_payment(&payment).await.unwrap();
        resum(store, order_id).await;
        payment
    }

    async fn resum(store: &InMemoryStore, order_id: Uuid) -> Decimal {
        let paid = paid_total(&store.payments(order_id).await.unwrap()).unwrap();
        store.write_paid_amount(order_id, paid).await.unwrap();
        paid
    }

    #[tokio::test]
    async fn test_recompute_two_item_example() {
        let (store, calculator, order_id) =
            setup(vec![draft(dec!(2), dec!(100), dec!(10)), draft(dec!(1), dec!(50), dec!(0))]).await;

        let outcome = calculator.recompute(order_id, false).await.unwrap();
        assert_eq!(outcome.subtotal(), dec!(250));
        assert_eq!(outcome.totals().discount_total, dec!(20));
        assert_eq!(outcome.totals().final_payable(), dec!(230));

        pay(&store, order_id, dec!(100)).await;

        let order = store.require_order(order_id).await.unwrap();
        assert_eq!(order.remaining_balance(), dec!(130));
    }

    #[tokio::test]
    async fn test_empty_items_recompute_to_zero() {
        let (_store, calculator, order_id) = setup(vec![]).await;
        let outcome = calculator.recompute(order_id, false).await.unwrap();
        assert_eq!(outcome.totals(), Totals::default());
    }

    #[tokio::test]
    async fn test_inactive_items_are_ignored() {
        let (store, calculator, order_id) = setup(vec![draft(dec!(1), dec!(40), dec!(0))]).await;
        let mut inactive = LineItem::new(order_id, draft(dec!(3), dec!(10), dec!(0)));
        inactive.active = false;
        store.insert_item(&inactive).await.unwrap();

        assert_eq!(calculator.recompute(order_id, false).await.unwrap().subtotal(), dec!(40));
    }

    #[tokio::test]
    async fn test_paid_order_is_protected_unless_forced() {
        let (store, calculator, order_id) = setup(vec![draft(dec!(1), dec!(100), dec!(0))]).await;
        calculator.recompute(order_id, false).await.unwrap();
        pay(&store, order_id, dec!(10)).await;
        store.insert_item(&LineItem::new(order_id, draft(dec!(1), dec!(60), dec!(0)))).await.unwrap();

        let protected = calculator.recompute(order_id, false).await.unwrap();
        assert!(protected.is_protected());
        assert_eq!(store.require_order(order_id).await.unwrap().subtotal, dec!(100));

        let forced = calculator.recompute(order_id, true).await.unwrap();
        assert!(!forced.is_protected());
        assert_eq!(store.require_order(order_id).await.unwrap().subtotal, dec!(160));
    }

    #[tokio::test]
    async fn test_resum_never_drifts() {
        let (store, _calculator, order_id) = setup(vec![]).await;
        let first = pay(&store, order_id, dec!(30)).await;
        pay(&store, order_id, dec!(45.50)).await;
        assert_eq!(resum(&store, order_id).await, dec!(75.50));

        store.delete_payment(order_id, first.id).await.unwrap();
        assert_eq!(resum(&store, order_id).await, dec!(45.50));
        assert_eq!(resum(&store, order_id).await, dec!(45.50));
    }

    #[test]
    fn test_paid_total_overflow_is_an_error() {
        let order_id = Uuid::new_v4();
        let huge = Payment::new(order_id, dec!(50000000000000000000000000000), PaymentMethod::Cash, None);
        let result = paid_total(&[huge.clone(), huge]);
        assert!(matches!(result, Err(OrderError::AmountOutOfRange)));

        let near_cap = Payment::new(order_id, MAX_AMOUNT, PaymentMethod::Card, None);
        let one = Payment::new(order_id, dec!(0.01), PaymentMethod::Card, None);
        assert_eq!(paid_total(&[near_cap.clone()]).unwrap(), MAX_AMOUNT);
        assert!(matches!(paid_total(&[near_cap, one]), Err(OrderError::AmountOutOfRange)));
    }

    #[test]
    fn test_totals_beyond_range_is_an_error() {
        let order_id = Uuid::new_v4();
        let items: Vec<LineItem> = (0..2)
            .map(|_| LineItem::new(order_id, draft(dec!(1000), dec!(900000000), dec!(0))))
            .collect();
        assert!(matches!(totals(&items), Err(OrderError::AmountOutOfRange)));
        assert_eq!(totals(&items[..1]).unwrap().subtotal, dec!(900000000000));
    }

    #[tokio::test]
    async fn test_stage_only_writes_changed_totals() {
        let (store, calculator, order_id) = setup(vec![draft(dec!(1), dec!(70), dec!(0))]).await;
        let order = store.require_order(order_id).await.unwrap();
        let items = store.items(order_id).await.unwrap();

        let mut batch = WriteBatch::new();
        calculator.stage(&order, &items, false, &mut batch).unwrap();
        assert_eq!(batch.len(), 1);
        store.commit(batch).await.unwrap();

        let order = store.require_order(order_id).await.unwrap();
        let mut batch = WriteBatch::new();
        let outcome = calculator.stage(&order, &items, false, &mut batch).unwrap();
        assert!(batch.is_empty());
        assert_eq!(outcome.subtotal(), dec!(70));
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let (_store, calculator, _) = setup(vec![]).await;
        let result = calculator.recompute(Uuid::new_v4(), false).await;
        assert!(matches!(result, Err(OrderError::Store(StoreError::NotFound { .. }))));
    }

    fn item_strategy() -> impl Strategy<Value = (u32, u32, u32)> {
        (1u32..500, 0u32..100_000, 0u32..=100)
    }

    proptest! {
        #[test]
        fn prop_recompute_is_idempotent_and_matches_items(lines in prop::collection::vec(item_strategy(), 0..8)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let drafts = lines
                    .iter()
                    .map(|(q, p, d)| draft(Decimal::new(*q as i64, 1), Decimal::new(*p as i64, 2), Decimal::from(*d)))
                    .collect::<Vec<_>>();
                let expected: Decimal = drafts.iter().map(|d| d.quantity * d.unit_price).sum();
                let (store, calculator, order_id) = setup(drafts).await;

                let first = calculator.recompute(order_id, false).await.unwrap();
                let stored_first = store.require_order(order_id).await.unwrap();
                let second = calculator.recompute(order_id, false).await.unwrap();
                let stored_second = store.require_order(order_id).await.unwrap();

                assert_eq!(first.totals(), second.totals());
                assert_eq!(stored_first.subtotal, stored_second.subtotal);
                assert_eq!(stored_second.subtotal, expected);
                assert!(matches!(second, RecomputeOutcome::Recomputed { changed: false, .. }));
            });
        }

        #[test]
        fn prop_payment_protection_holds(
            lines in prop::collection::vec(item_strategy(), 1..6),
            extra in item_strategy(),
            paid in 1u32..10_000,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let drafts = lines
                    .iter()
                    .map(|(q, p, d)| draft(Decimal::new(*q as i64, 1), Decimal::new(*p as i64, 2), Decimal::from(*d)))
                    .collect::<Vec<_>>();
                let (store, calculator, order_id) = setup(drafts).await;
                calculator.recompute(order_id, false).await.unwrap();
                pay(&store, order_id, Decimal::from(paid)).await;
                let before = store.require_order(order_id).await.unwrap();

                let (q, p, d) = extra;
                store
                    .insert_item(&LineItem::new(order_id, draft(Decimal::new(q as i64, 1), Decimal::new(p as i64, 2), Decimal::from(d))))
                    .await
                    .unwrap();
                calculator.recompute(order_id, false).await.unwrap();
                let after = store.require_order(order_id).await.unwrap();

                assert_eq!(before.subtotal, after.subtotal);
                assert_eq!(before.final_payable(), after.final_payable());
            });
        }
    }
}
