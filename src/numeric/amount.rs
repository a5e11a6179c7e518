// ============================================================================
// Decimal Amounts
// ============================================================================

use super::errors::{NumericError, NumericResult};
use rust_decimal::{Decimal, RoundingStrategy};

/// Limit or execution price, expressed in units of the quote asset.
pub type Price = Decimal;

/// Order or trade quantity, expressed in units of the base asset.
pub type Quantity = Decimal;

/// Reject amounts with more fractional digits than `decimals`.
pub fn ensure_precision(value: Decimal, decimals: u32) -> NumericResult<()> {
    if value.normalize().scale() > decimals {
        return Err(NumericError::PrecisionLoss {
            value: value.to_string(),
            decimals,
        });
    }
    Ok(())
}

pub fn ensure_non_negative(value: Decimal) -> NumericResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(NumericError::Negative(value.to_string()));
    }
    Ok(())
}

/// Round half-even to the asset's precision.
pub fn round_to_asset(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven)
}

/// Quote-asset value of `quantity` at `price`, rounded to the quote asset's precision.
pub fn notional(price: Price, quantity: Quantity, quote_decimals: u32) -> NumericResult<Decimal> {
    price
        .checked_mul(quantity)
        .map(|value| round_to_asset(value, quote_decimals))
        .ok_or(NumericError::Overflow)
}

/// `amount * percentage / 100`, rounded to the asset's precision.
pub fn commission(amount: Decimal, percentage: Decimal, decimals: u32) -> NumericResult<Decimal> {
    ensure_non_negative(amount)?;
    ensure_non_negative(percentage)?;
    amount
        .checked_mul(percentage)
        .and_then(|value| value.checked_div(Decimal::ONE_HUNDRED))
        .map(|value| round_to_asset(value, decimals))
        .ok_or(NumericError::Overflow)
}
