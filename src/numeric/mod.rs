// ============================================================================
// Numeric Module
// Arbitrary-precision decimal amounts for prices, quantities and commissions
// ============================================================================
//
// This module provides:
// - Price/Quantity aliases over rust_decimal::Decimal
// - Precision checks against an asset's configured decimals
// - Notional and commission calculations with explicit rounding
//
// Design principles:
// - No floating-point operations
// - All arithmetic returns Result (no panics)
// - Amounts persist as decimal strings, never floats

mod amount;
mod errors;

pub use amount::{
    commission, ensure_non_negative, ensure_precision, notional, round_to_asset, Price, Quantity,
};
pub use errors::{NumericError, NumericResult};
