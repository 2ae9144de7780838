use analysis_core::{AnalysisResult, PriceBar, TechnicalAnalyzer};
use serde_json::json;

use crate::indicators::*;
use crate::signal::{score_dimensions, MIN_SIGNAL_BARS};
use crate::support_resistance::{calc_support_resistance, DEFAULT_LOOKBACK};
use crate::trade_plan::{plan_from_atr, TradePlanParams};

/// Runs the full pipeline: indicators, levels, signal, trade plan.
pub struct TechnicalAnalysisEngine {
    params: TradePlanParams,
}

impl TechnicalAnalysisEngine {
    pub fn new() -> Self {
        Self {
            params: TradePlanParams::default(),
        }
    }

    pub fn with_risk_fraction(risk_fraction: f64) -> Self {
        Self {
            params: TradePlanParams::with_risk_fraction(risk_fraction),
        }
    }

    pub fn with_params(params: TradePlanParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TradePlanParams {
        &self.params
    }

    /// `None` until the series holds enough bars for a signal.
    pub fn analyze_bars(&self, bars: &[PriceBar]) -> Option<AnalysisResult> {
        if bars.len() < MIN_SIGNAL_BARS {
            tracing::debug!("Analysis needs {} bars, got {}", MIN_SIGNAL_BARS, bars.len());
            return None;
        }
        let last = bars.last()?;

        let indicators = compute_indicator_set(bars);
        let levels = calc_support_resistance(bars, DEFAULT_LOOKBACK);
        let signal = score_dimensions(bars, &indicators, &levels);
        let trade_plan = plan_from_atr(
            last.close,
            last_defined(&indicators.atr),
            &signal,
            &levels,
            &self.params,
        );

        Some(AnalysisResult {
            signal,
            trade_plan,
            indicators,
            support_levels: levels.support,
            resistance_levels: levels.resistance,
        })
    }

    /// Latest value of each indicator plus the score breakdown, for logging
    /// and debug panels.
    pub fn metrics(result: &AnalysisResult) -> serde_json::Value {
        let ind = &result.indicators;
        json!({
            "total": result.signal.total,
            "level": result.signal.level,
            "trend": result.signal.trend,
            "oscillator": result.signal.oscillator,
            "volume": result.signal.volume,
            "support_resistance": result.signal.support_resistance,
            "reasons": result.signal.reasons,
            "ma5": last_defined(&ind.ma5),
            "ma10": last_defined(&ind.ma10),
            "ma20": last_defined(&ind.ma20),
            "ma60": last_defined(&ind.ma60),
            "macd_dif": last_defined(&ind.macd.dif),
            "macd_dea": last_defined(&ind.macd.dea),
            "macd_histogram": last_defined(&ind.macd.histogram),
            "rsi": last_defined(&ind.rsi),
            "kdj_k": last_defined(&ind.kdj.k),
            "kdj_d": last_defined(&ind.kdj.d),
            "kdj_j": last_defined(&ind.kdj.j),
            "boll_upper": last_defined(&ind.bollinger.upper),
            "boll_lower": last_defined(&ind.bollinger.lower),
            "vwap": last_defined(&ind.vwap),
            "atr": last_defined(&ind.atr),
            "support": result.support_levels.first(),
            "resistance": result.resistance_levels.first(),
            "has_trade_plan": result.trade_plan.is_some(),
        })
    }
}

impl TechnicalAnalyzer for TechnicalAnalysisEngine {
    fn analyze(&self, bars: &[PriceBar]) -> Option<AnalysisResult> {
        self.analyze_bars(bars)
    }
}

impl Default for TechnicalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{Direction, SignalLevel};

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: i as i64 * 86_400_000,
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 1000.0,
                amount: None,
            })
            .collect()
    }

    fn flat_bars(n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| PriceBar {
                timestamp: i as i64 * 86_400_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1000.0,
                amount: None,
            })
            .collect()
    }

    #[test]
    fn test_short_history_returns_none() {
        let engine = TechnicalAnalysisEngine::new();
        assert!(engine.analyze(&flat_bars(59)).is_none());
        assert!(engine.analyze(&[]).is_none());
    }

    #[test]
    fn test_flat_market_has_no_trade_plan() {
        let engine = TechnicalAnalysisEngine::new();
        let result = engine.analyze(&flat_bars(60)).unwrap();

        assert_eq!(result.signal.total, 0);
        assert_eq!(result.signal.level, SignalLevel::Neutral);
        assert!(result.trade_plan.is_none());
        assert!(result.support_levels.is_empty());
        assert!(result.resistance_levels.is_empty());
        assert_eq!(result.indicators.ma60.len(), 60);
        assert_eq!(result.indicators.ma60[59], Some(100.0));
    }

    #[test]
    fn test_uptrend_produces_long_plan() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let bars = bars_from_closes(&closes);
        let engine = TechnicalAnalysisEngine::new();
        let result = engine.analyze(&bars).unwrap();

        assert_eq!(result.signal.level, SignalLevel::Buy);
        let plan = result.trade_plan.unwrap();
        assert_eq!(plan.direction, Direction::Long);
        assert!(plan.stop_loss < plan.entry_price);
        assert!(plan.target_price > plan.entry_price);
        // no pivots in a monotone series, so the 2:1 fallback applies
        assert_eq!(plan.risk_reward_ratio, 2.0);
        assert_eq!(plan.position_size_pct, 25.0);
    }

    #[test]
    fn test_smaller_risk_fraction_shrinks_position() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let bars = bars_from_closes(&closes);
        let result = TechnicalAnalysisEngine::with_risk_fraction(0.001)
            .analyze(&bars)
            .unwrap();

        let plan = result.trade_plan.unwrap();
        assert!(plan.position_size_pct > 0.0);
        assert!(plan.position_size_pct < 25.0);
    }

    #[test]
    fn test_metrics_payload() {
        let engine = TechnicalAnalysisEngine::default();
        let result = engine.analyze(&flat_bars(60)).unwrap();
        let metrics = TechnicalAnalysisEngine::metrics(&result);

        assert_eq!(metrics["total"], 0);
        assert_eq!(metrics["level"], "neutral");
        assert_eq!(metrics["rsi"], 50.0);
        assert_eq!(metrics["has_trade_plan"], false);
        assert!(metrics["support"].is_null());
    }
}
