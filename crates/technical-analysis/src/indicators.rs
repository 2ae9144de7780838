use analysis_core::{BollingerSeries, IndicatorSeries, IndicatorSet, KdjSeries, MacdSeries, PriceBar};

/// Last defined value of a series
pub fn last_defined(series: &[Option<f64>]) -> Option<f64> {
    series.iter().rev().find_map(|v| *v)
}

/// Up to `n` most recent defined values, oldest first
pub fn last_n_defined(series: &[Option<f64>], n: usize) -> Vec<f64> {
    let mut values: Vec<f64> = series.iter().rev().filter_map(|v| *v).take(n).collect();
    values.reverse();
    values
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> IndicatorSeries {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result[i] = Some(sum / period as f64);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values
pub fn ema(data: &[f64], period: usize) -> IndicatorSeries {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(prev);

    for i in period..data.len() {
        prev = (data[i] - prev) * multiplier + prev;
        result[i] = Some(prev);
    }

    result
}

/// MACD (Moving Average Convergence Divergence)
///
/// DEA is the EMA of the defined DIF values only, mapped back onto the
/// original indices, so its warm-up starts where DIF becomes defined.
pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdSeries {
    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    let dif: IndicatorSeries = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(fast, slow)| match (fast, slow) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let (indices, values): (Vec<usize>, Vec<f64>) = dif
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .unzip();

    let signal_compact = ema(&values, signal_period);
    let mut dea = vec![None; data.len()];
    for (pos, &idx) in indices.iter().enumerate() {
        dea[idx] = signal_compact[pos];
    }

    let histogram = dif
        .iter()
        .zip(&dea)
        .map(|(d, e)| match (d, e) {
            (Some(d), Some(e)) => Some((d - e) * 2.0),
            _ => None,
        })
        .collect();

    MacdSeries { dif, dea, histogram }
}

/// Relative Strength Index (Wilder's smoothing)
pub fn rsi(data: &[f64], period: usize) -> IndicatorSeries {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        result[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // no movement at all reads as neutral, pure gains as 100
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// KDJ stochastic oscillator
pub fn kdj(bars: &[PriceBar], period: usize) -> KdjSeries {
    let len = bars.len();
    let mut k = vec![None; len];
    let mut d = vec![None; len];
    let mut j = vec![None; len];
    if period == 0 || len < period {
        return KdjSeries { k, d, j };
    }

    let mut prev_k = 50.0;
    let mut prev_d = 50.0;

    for i in period - 1..len {
        let window = &bars[i + 1 - period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

        let rsv = if highest == lowest {
            50.0
        } else {
            (bars[i].close - lowest) / (highest - lowest) * 100.0
        };

        // (2*prev + x) / 3 keeps a flat market at exactly 50
        let k_val = (2.0 * prev_k + rsv) / 3.0;
        let d_val = (2.0 * prev_d + k_val) / 3.0;

        k[i] = Some(k_val);
        d[i] = Some(d_val);
        j[i] = Some(3.0 * k_val - 2.0 * d_val);

        prev_k = k_val;
        prev_d = d_val;
    }

    KdjSeries { k, d, j }
}

/// Bollinger Bands with population standard deviation
pub fn bollinger_bands(data: &[f64], period: usize, multiplier: f64) -> BollingerSeries {
    let len = data.len();
    let mut upper = vec![None; len];
    let mut lower = vec![None; len];
    let middle = sma(data, period);
    if period == 0 || len < period {
        return BollingerSeries { upper, middle, lower };
    }

    for i in period - 1..len {
        let slice = &data[i + 1 - period..=i];
        let mean = slice.iter().sum::<f64>() / period as f64;
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper[i] = Some(mean + multiplier * std);
        lower[i] = Some(mean - multiplier * std);
    }

    BollingerSeries { upper, middle, lower }
}

/// On-Balance Volume
pub fn obv(bars: &[PriceBar]) -> IndicatorSeries {
    let mut result = Vec::with_capacity(bars.len());
    let Some(first) = bars.first() else {
        return result;
    };

    let mut running = first.volume;
    result.push(Some(running));

    for pair in bars.windows(2) {
        if pair[1].close > pair[0].close {
            running += pair[1].volume;
        } else if pair[1].close < pair[0].close {
            running -= pair[1].volume;
        }
        result.push(Some(running));
    }

    result
}

/// Trailing-window Volume-Weighted Average Price over the typical price
pub fn vwap(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let mut result = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return result;
    }

    for i in period - 1..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let volume: f64 = window.iter().map(|b| b.volume).sum();
        if volume > 0.0 {
            let tpv: f64 = window.iter().map(|b| b.typical_price() * b.volume).sum();
            result[i] = Some(tpv / volume);
        }
    }

    result
}

/// True range per bar; the first bar has no previous close
pub fn true_range(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let high_low = bar.high - bar.low;
            if i == 0 {
                return high_low;
            }
            let prev_close = bars[i - 1].close;
            high_low
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Average True Range (Wilder's smoothing)
pub fn atr(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let mut result = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return result;
    }

    let true_ranges = true_range(bars);
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(atr);

    for i in period..true_ranges.len() {
        atr = (atr * (period - 1) as f64 + true_ranges[i]) / period as f64;
        result[i] = Some(atr);
    }

    result
}

/// Compute every indicator the scoring engine and the chart overlay consume.
pub fn compute_indicator_set(bars: &[PriceBar]) -> IndicatorSet {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    IndicatorSet {
        ma5: sma(&closes, 5),
        ma10: sma(&closes, 10),
        ma20: sma(&closes, 20),
        ma60: sma(&closes, 60),
        macd: macd(&closes, 12, 26, 9),
        rsi: rsi(&closes, 14),
        kdj: kdj(bars, 9),
        bollinger: bollinger_bands(&closes, 20, 2.0),
        obv: obv(bars),
        vwap: vwap(bars, 20),
        atr: atr(bars, 14),
    }
}
