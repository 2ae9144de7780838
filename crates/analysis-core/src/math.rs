//! Numeric helpers shared by the engines.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Compute the mean of a data slice. `None` for an empty slice.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Round to `dp` decimal places, halves away from zero.
///
/// Goes through `Decimal` so that values like 2.675 round the way a price
/// display expects rather than following their binary representation.
/// Non-finite input is returned unchanged.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Clamp a dimension score into `[-limit, limit]`.
pub fn clamp_score(score: i32, limit: i32) -> i32 {
    score.clamp(-limit, limit)
}
