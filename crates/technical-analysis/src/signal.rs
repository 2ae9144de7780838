use analysis_core::{math, IndicatorSet, PriceBar, SignalLevel, SignalScore, SrLevels};
use serde::{Deserialize, Serialize};

use crate::indicators::{compute_indicator_set, last_n_defined};
use crate::support_resistance::{calc_sr_score, calc_support_resistance, DEFAULT_LOOKBACK, SR_SCORE_MAX};

/// Bars required before any signal is produced
pub const MIN_SIGNAL_BARS: usize = 60;

pub const TREND_MAX: i32 = 40;
pub const OSCILLATOR_MAX: i32 = 30;
pub const VOLUME_MAX: i32 = 20;

const OBV_TREND_WINDOW: usize = 10;

/// Classify a composite total. Boundaries are strict: 60 is `Buy`, 30 is `Neutral`.
pub fn classify_total(total: i32) -> SignalLevel {
    if total > 60 {
        SignalLevel::StrongBuy
    } else if total > 30 {
        SignalLevel::Buy
    } else if total > -30 {
        SignalLevel::Neutral
    } else if total > -60 {
        SignalLevel::Sell
    } else {
        SignalLevel::StrongSell
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObvTrend {
    Up,
    Down,
    Flat,
}

/// Direction of OBV over its last 10 defined values.
///
/// Up requires more than 1.5x as many up-moves as down-moves, and vice versa.
pub fn get_obv_trend(obv: &[Option<f64>]) -> ObvTrend {
    let values = last_n_defined(obv, OBV_TREND_WINDOW);
    let mut ups = 0usize;
    let mut downs = 0usize;
    for pair in values.windows(2) {
        if pair[1] > pair[0] {
            ups += 1;
        } else if pair[1] < pair[0] {
            downs += 1;
        }
    }

    if ups as f64 > downs as f64 * 1.5 {
        ObvTrend::Up
    } else if downs as f64 > ups as f64 * 1.5 {
        ObvTrend::Down
    } else {
        ObvTrend::Flat
    }
}

/// Last two points where both series are defined, oldest first
fn last_two_pairs(a: &[Option<f64>], b: &[Option<f64>]) -> Option<((f64, f64), (f64, f64))> {
    let mut pairs = a
        .iter()
        .zip(b)
        .rev()
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some((*x, *y)),
            _ => None,
        });
    let current = pairs.next()?;
    let previous = pairs.next()?;
    Some((previous, current))
}

fn ma_alignment_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let ma5 = ind.ma5.last().copied().flatten();
    let ma10 = ind.ma10.last().copied().flatten();
    let ma20 = ind.ma20.last().copied().flatten();

    let (Some(ma5), Some(ma10)) = (ma5, ma10) else {
        return 0;
    };

    if let Some(ma20) = ma20 {
        if ma5 > ma10 && ma10 > ma20 {
            reasons.push("Bullish MA alignment".to_string());
            return 20;
        }
        if ma5 < ma10 && ma10 < ma20 {
            reasons.push("Bearish MA alignment".to_string());
            return -20;
        }
    }

    if ma5 > ma10 {
        reasons.push("MA5 above MA10".to_string());
        10
    } else if ma5 < ma10 {
        reasons.push("MA5 below MA10".to_string());
        -10
    } else {
        0
    }
}

fn macd_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let Some(((prev_dif, prev_dea), (dif, dea))) = last_two_pairs(&ind.macd.dif, &ind.macd.dea) else {
        return 0;
    };

    if prev_dif <= prev_dea && dif > dea {
        reasons.push("MACD golden cross".to_string());
        return 20;
    }
    if prev_dif >= prev_dea && dif < dea {
        reasons.push("MACD death cross".to_string());
        return -20;
    }

    let hist = last_n_defined(&ind.macd.histogram, 3);
    if hist.len() < 3 {
        return 0;
    }
    let rising = hist[2] > hist[1] && hist[1] > hist[0];
    let falling = hist[2] < hist[1] && hist[1] < hist[0];

    if rising && dif > dea {
        reasons.push("MACD momentum building".to_string());
        10
    } else if falling && dif < dea {
        reasons.push("MACD momentum fading".to_string());
        -10
    } else {
        0
    }
}

fn trend_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let score = ma_alignment_score(ind, reasons) + macd_score(ind, reasons);
    math::clamp_score(score, TREND_MAX)
}

fn rsi_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let values = last_n_defined(&ind.rsi, 2);
    let &[prev, current] = values.as_slice() else {
        return 0;
    };
    let turning_up = current > prev;
    let turning_down = current < prev;

    if current < 30.0 && turning_up {
        reasons.push("RSI oversold and turning up".to_string());
        15
    } else if current > 70.0 && turning_down {
        reasons.push("RSI overbought and turning down".to_string());
        -15
    } else if current < 40.0 && turning_up {
        reasons.push("RSI weak and turning up".to_string());
        8
    } else if current > 60.0 && turning_down {
        reasons.push("RSI strong and turning down".to_string());
        -8
    } else {
        0
    }
}

fn kdj_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let Some(((prev_k, prev_d), (k, d))) = last_two_pairs(&ind.kdj.k, &ind.kdj.d) else {
        return 0;
    };

    if prev_k <= prev_d && k > d {
        if k < 30.0 {
            reasons.push("KDJ golden cross in oversold zone".to_string());
            15
        } else {
            reasons.push("KDJ golden cross".to_string());
            8
        }
    } else if prev_k >= prev_d && k < d {
        if k > 70.0 {
            reasons.push("KDJ death cross in overbought zone".to_string());
            -15
        } else {
            reasons.push("KDJ death cross".to_string());
            -8
        }
    } else {
        0
    }
}

fn oscillator_score(ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let score = rsi_score(ind, reasons) + kdj_score(ind, reasons);
    math::clamp_score(score, OSCILLATOR_MAX)
}

fn obv_score(bars: &[PriceBar], ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let trend = get_obv_trend(&ind.obv);
    if trend == ObvTrend::Flat || bars.len() < OBV_TREND_WINDOW {
        return 0;
    }

    let window = &bars[bars.len() - OBV_TREND_WINDOW..];
    let price_change = window[window.len() - 1].close - window[0].close;

    match trend {
        ObvTrend::Up if price_change > 0.0 => {
            reasons.push("OBV confirms rally".to_string());
            10
        }
        ObvTrend::Up => {
            reasons.push("OBV accumulation divergence".to_string());
            5
        }
        ObvTrend::Down if price_change < 0.0 => {
            reasons.push("OBV confirms decline".to_string());
            -10
        }
        ObvTrend::Down => {
            reasons.push("OBV distribution divergence".to_string());
            -5
        }
        ObvTrend::Flat => 0,
    }
}

fn vwap_score(bars: &[PriceBar], ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let (Some(last), Some(vwap)) = (bars.last(), ind.vwap.last().copied().flatten()) else {
        return 0;
    };

    if last.close > vwap {
        reasons.push("Price above VWAP".to_string());
        10
    } else if last.close < vwap {
        reasons.push("Price below VWAP".to_string());
        -10
    } else {
        0
    }
}

fn volume_score(bars: &[PriceBar], ind: &IndicatorSet, reasons: &mut Vec<String>) -> i32 {
    let score = obv_score(bars, ind, reasons) + vwap_score(bars, ind, reasons);
    math::clamp_score(score, VOLUME_MAX)
}

/// Score pre-computed indicators. Callers are expected to have checked
/// `MIN_SIGNAL_BARS`; shorter input simply scores the rules that have data.
pub fn score_dimensions(bars: &[PriceBar], ind: &IndicatorSet, levels: &SrLevels) -> SignalScore {
    let mut reasons = Vec::new();

    let trend = trend_score(ind, &mut reasons);
    let oscillator = oscillator_score(ind, &mut reasons);
    let volume = volume_score(bars, ind, &mut reasons);
    let support_resistance = math::clamp_score(calc_sr_score(bars, levels), SR_SCORE_MAX);
    if support_resistance > 0 {
        reasons.push("Holding above support".to_string());
    } else if support_resistance < 0 {
        reasons.push("Pressing into resistance".to_string());
    }

    let total = trend + oscillator + volume + support_resistance;
    let level = classify_total(total);

    SignalScore {
        total,
        trend,
        oscillator,
        volume,
        support_resistance,
        level,
        label: level.to_label().to_string(),
        reasons,
    }
}

/// Composite buy/sell signal. `None` below `MIN_SIGNAL_BARS` bars.
pub fn calc_signal_score(bars: &[PriceBar]) -> Option<SignalScore> {
    if bars.len() < MIN_SIGNAL_BARS {
        tracing::debug!("Signal needs {} bars, got {}", MIN_SIGNAL_BARS, bars.len());
        return None;
    }

    let indicators = compute_indicator_set(bars);
    let levels = calc_support_resistance(bars, DEFAULT_LOOKBACK);
    Some(score_dimensions(bars, &indicators, &levels))
}
