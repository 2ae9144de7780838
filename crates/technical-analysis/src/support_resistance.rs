use analysis_core::{math, PriceBar, SrLevels};
use serde::{Deserialize, Serialize};

/// Default half-width of the pivot window
pub const DEFAULT_LOOKBACK: usize = 5;
/// Relative distance for merging prices into one level
pub const DEFAULT_TOLERANCE: f64 = 0.02;
/// Price within this fraction of a level counts as "at" the level
const PROXIMITY: f64 = 0.02;
const MAX_LEVELS: usize = 3;
/// Maximum absolute score for this dimension
pub const SR_SCORE_MAX: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
    pub kind: PivotKind,
}

/// Local extremes relative to a symmetric `lookback` window.
///
/// A bar is a pivot-high only if its high is strictly greater than every other
/// high in `[i - lookback, i + lookback]`; equal highs disqualify both bars.
pub fn find_pivots(bars: &[PriceBar], lookback: usize) -> Vec<Pivot> {
    if lookback == 0 || bars.len() < 2 * lookback + 1 {
        return vec![];
    }

    let mut pivots = Vec::new();
    for i in lookback..bars.len() - lookback {
        let window = &bars[i - lookback..=i + lookback];
        let high = bars[i].high;
        let low = bars[i].low;

        let is_high = window
            .iter()
            .enumerate()
            .all(|(j, b)| j == lookback || b.high < high);
        if is_high {
            pivots.push(Pivot { index: i, price: high, kind: PivotKind::High });
        }

        let is_low = window
            .iter()
            .enumerate()
            .all(|(j, b)| j == lookback || b.low > low);
        if is_low {
            pivots.push(Pivot { index: i, price: low, kind: PivotKind::Low });
        }
    }

    pivots
}

struct Cluster {
    sum: f64,
    count: usize,
}

impl Cluster {
    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Greedy clustering of sorted prices around a running mean.
///
/// Single-touch clusters are dropped. Output is ascending.
pub fn cluster_price_levels(prices: &[f64], tolerance: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut clusters: Vec<Cluster> = Vec::new();
    for price in sorted {
        match clusters.last_mut() {
            Some(current) => {
                let mean = current.mean();
                if mean != 0.0 && (price - mean).abs() / mean.abs() <= tolerance {
                    current.sum += price;
                    current.count += 1;
                } else {
                    clusters.push(Cluster { sum: price, count: 1 });
                }
            }
            None => clusters.push(Cluster { sum: price, count: 1 }),
        }
    }

    clusters
        .iter()
        .filter(|c| c.count >= 2)
        .map(Cluster::mean)
        .collect()
}

/// Nearest clustered support and resistance levels around the last close.
pub fn calc_support_resistance(bars: &[PriceBar], lookback: usize) -> SrLevels {
    let Some(last) = bars.last() else {
        return SrLevels::default();
    };
    if lookback == 0 || bars.len() < lookback * 3 {
        return SrLevels::default();
    }

    // highs and lows share one level set; side is decided by the current price
    let prices: Vec<f64> = find_pivots(bars, lookback).iter().map(|p| p.price).collect();
    let levels = cluster_price_levels(&prices, DEFAULT_TOLERANCE);
    let current_price = last.close;

    let mut support: Vec<f64> = levels.iter().copied().filter(|&l| l < current_price).collect();
    support.sort_by(|a, b| b.total_cmp(a));
    support.truncate(MAX_LEVELS);

    let mut resistance: Vec<f64> = levels.iter().copied().filter(|&l| l > current_price).collect();
    resistance.sort_by(|a, b| a.total_cmp(b));
    resistance.truncate(MAX_LEVELS);

    SrLevels { support, resistance }
}

/// Mean volume of the last 5 bars above the mean of the 5 before them
pub fn is_volume_rising(bars: &[PriceBar]) -> bool {
    if bars.len() < 10 {
        return false;
    }
    let volumes: Vec<f64> = bars[bars.len() - 10..].iter().map(|b| b.volume).collect();
    match (math::mean(&volumes[5..]), math::mean(&volumes[..5])) {
        (Some(recent), Some(prior)) => recent > prior,
        _ => false,
    }
}

/// Support/resistance proximity score in `[-10, 10]`.
pub fn calc_sr_score(bars: &[PriceBar], levels: &SrLevels) -> i32 {
    let Some(last) = bars.last() else {
        return 0;
    };
    if levels.is_empty() || last.close <= 0.0 {
        return 0;
    }

    let current_price = last.close;
    let volume_rising = is_volume_rising(bars);
    let mut score = 0;

    if let Some(&support) = levels.support.first() {
        let distance = (current_price - support) / current_price;
        if (0.0..=PROXIMITY).contains(&distance) {
            score += if volume_rising { 10 } else { 5 };
        }
    }

    if let Some(&resistance) = levels.resistance.first() {
        let distance = (resistance - current_price) / current_price;
        if (0.0..=PROXIMITY).contains(&distance) {
            // rising volume into resistance reads as distribution
            score -= if volume_rising { 10 } else { 5 };
        }
    }

    math::clamp_score(score, SR_SCORE_MAX)
}
