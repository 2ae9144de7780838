use analysis_core::{math, Direction, PriceBar, SignalLevel, SignalScore, SrLevels, TradePlan};
use serde::{Deserialize, Serialize};

use crate::indicators::{atr, last_defined};

/// ATR period used for stop distance
pub const ATR_PERIOD: usize = 14;

/// Lowest price a stop or target may sit at (one tick)
pub const MIN_PRICE: f64 = 0.01;

/// Rule parameters for deriving a trade plan from a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlanParams {
    /// Fraction of notional risked per trade (e.g., 0.02 = 2%)
    pub risk_fraction: f64,
    /// Stop distance in ATR multiples
    pub stop_atr_multiple: f64,
    /// Reward:risk used when no level sits beyond 1:1
    pub fallback_reward_multiple: f64,
    /// Hard cap on position size as a fraction of portfolio
    pub max_position_fraction: f64,
}

impl Default for TradePlanParams {
    fn default() -> Self {
        Self {
            risk_fraction: 0.02,
            stop_atr_multiple: 2.0,
            fallback_reward_multiple: 2.0,
            max_position_fraction: 0.25,
        }
    }
}

impl TradePlanParams {
    pub fn with_risk_fraction(risk_fraction: f64) -> Self {
        Self {
            risk_fraction,
            ..Self::default()
        }
    }
}

/// Derive a trade plan from the latest bar of `bars`.
///
/// Returns `None` for a neutral signal or when ATR(14) is not available yet.
pub fn generate_trade_plan(
    bars: &[PriceBar],
    signal: &SignalScore,
    levels: &SrLevels,
    params: &TradePlanParams,
) -> Option<TradePlan> {
    let close = bars.last()?.close;
    let atr_value = last_defined(&atr(bars, ATR_PERIOD));
    plan_from_atr(close, atr_value, signal, levels, params)
}

/// Same as [`generate_trade_plan`] for callers that already hold the ATR value.
pub fn plan_from_atr(
    close: f64,
    atr: Option<f64>,
    signal: &SignalScore,
    levels: &SrLevels,
    params: &TradePlanParams,
) -> Option<TradePlan> {
    if signal.level == SignalLevel::Neutral {
        return None;
    }
    let atr = atr.filter(|a| a.is_finite() && *a >= 0.0)?;
    if !close.is_finite() {
        return None;
    }

    let direction = if signal.total > 0 { Direction::Long } else { Direction::Short };
    let risk = params.stop_atr_multiple * atr;

    let (stop_loss, target_price) = match direction {
        Direction::Long => {
            let target = levels
                .resistance
                .first()
                .copied()
                .filter(|r| r - close > risk)
                .unwrap_or(close + params.fallback_reward_multiple * risk);
            ((close - risk).max(MIN_PRICE), target)
        }
        Direction::Short => {
            let target = levels
                .support
                .first()
                .copied()
                .filter(|s| close - s > risk)
                .unwrap_or(close - params.fallback_reward_multiple * risk);
            (close + risk, target.max(MIN_PRICE))
        }
    };

    let risk_per_share = (close - stop_loss).abs();
    let (risk_reward_ratio, position_fraction) = if risk_per_share > 0.0 {
        let rr = (target_price - close).abs() / risk_per_share;
        let size = (params.risk_fraction * close / risk_per_share).min(params.max_position_fraction);
        (rr, size.max(0.0))
    } else {
        (0.0, 0.0)
    };

    Some(TradePlan {
        entry_price: math::round_dp(close, 2),
        stop_loss: math::round_dp(stop_loss, 2),
        target_price: math::round_dp(target_price, 2),
        risk_reward_ratio: math::round_dp(risk_reward_ratio, 2),
        position_size_pct: math::round_dp(position_fraction * 100.0, 1),
        atr_value: math::round_dp(atr, 3),
        direction,
    })
}
