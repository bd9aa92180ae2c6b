// ============================================================================
// Financial Calculator - Derives order totals from line items and payments
// ============================================================================
//
// - `subtotal` is the pre-discount sum over active items
// - `discount_total` is the sum of line discounts
// - the payable amount and remaining balance are derived on read
// - once an order has received payment, totals are frozen unless forced
//
// ============================================================================

pub mod calculator;
pub mod coerce;

pub use calculator::{evaluate, line_discount, paid_total, totals, FinancialCalculator, RecomputeOutcome, Totals};
