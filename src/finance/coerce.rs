use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse a number typed into a form. Accepts `,` as the decimal separator
/// (or as a thousands separator when a `.` is also present). Anything that
/// still fails to parse is zero.
pub fn lenient_decimal(raw: &str) -> Decimal {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }

    let normalized = if trimmed.contains('.') {
        trimmed.replace(',', "")
    } else {
        trimmed.replace(',', ".")
    };

    match Decimal::from_str(&normalized) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(raw = %raw, error = %e, "Malformed numeric input, using zero");
            Decimal::ZERO
        }
    }
}

/// Discount percentages outside `0..=100` count as no discount.
pub fn discount_percent(value: Decimal) -> Decimal {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        tracing::warn!(discount = %value, "Discount percentage out of range, using zero");
        return Decimal::ZERO;
    }
    value
}
