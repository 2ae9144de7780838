use analysis_core::{
    math, MarketOverview, SentimentAnalyzer, SentimentComponent, SentimentLevel, SentimentScore,
};
use serde::{Deserialize, Serialize};

pub const ADVANCE_DECLINE: &str = "advance_decline";
pub const LIMIT_UP: &str = "limit_up";
pub const LIMIT_DOWN: &str = "limit_down";
pub const INDEX_TREND: &str = "index_trend";
pub const NORTHBOUND: &str = "northbound";
pub const VOLUME: &str = "volume";

/// Limit-up (or limit-down) share of listed stocks that saturates its component
const LIMIT_RATE_SATURATION: f64 = 0.03;
/// Mean index move, in percent, mapped to the ends of the scale
const INDEX_PCT_RANGE: f64 = 3.0;
/// Northbound net flow, in million CNY, mapped to the ends of the scale
const NORTHBOUND_RANGE_MILLION: f64 = 10_000.0;
const NEUTRAL: f64 = 50.0;

/// Component weights. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentWeights {
    pub advance_decline: f64,
    pub limit_up: f64,
    pub limit_down: f64,
    pub index_trend: f64,
    pub northbound: f64,
    pub volume: f64,
}

impl Default for SentimentWeights {
    fn default() -> Self {
        Self {
            advance_decline: 0.25,
            limit_up: 0.15,
            limit_down: 0.15,
            index_trend: 0.20,
            northbound: 0.15,
            volume: 0.10,
        }
    }
}

impl SentimentWeights {
    pub fn sum(&self) -> f64 {
        self.advance_decline + self.limit_up + self.limit_down + self.index_trend + self.northbound + self.volume
    }
}

/// Market-wide fear/greed composite over a breadth and flow snapshot.
pub struct MarketSentimentEngine {
    weights: SentimentWeights,
}

impl MarketSentimentEngine {
    pub fn new() -> Self {
        Self {
            weights: SentimentWeights::default(),
        }
    }

    pub fn weights(&self) -> &SentimentWeights {
        &self.weights
    }

    pub fn calculate(&self, overview: &MarketOverview) -> SentimentScore {
        let w = &self.weights;
        let components = vec![
            component(ADVANCE_DECLINE, advance_decline_value(overview), w.advance_decline),
            component(LIMIT_UP, limit_up_value(overview), w.limit_up),
            component(LIMIT_DOWN, limit_down_value(overview), w.limit_down),
            component(INDEX_TREND, index_trend_value(overview), w.index_trend),
            component(NORTHBOUND, northbound_value(overview), w.northbound),
            // turnover history is not part of the snapshot
            component(VOLUME, NEUTRAL, w.volume),
        ];

        let weighted: f64 = components.iter().map(|c| c.value * c.weight).sum();
        let total = math::round_dp(weighted, 0).clamp(0.0, 100.0) as i32;
        let level = SentimentLevel::from_total(total);

        tracing::debug!(
            "Sentiment for {}: {} ({})",
            overview.trade_date,
            total,
            level.to_label()
        );

        SentimentScore {
            total,
            level,
            label: level.to_label().to_string(),
            components,
        }
    }
}

fn component(name: &str, value: f64, weight: f64) -> SentimentComponent {
    SentimentComponent {
        name: name.to_string(),
        value: value.clamp(0.0, 100.0),
        weight,
    }
}

fn advance_decline_value(overview: &MarketOverview) -> f64 {
    let total = overview.breadth.total();
    if total == 0 {
        return NEUTRAL;
    }
    overview.breadth.advancing as f64 / total as f64 * 100.0
}

/// Share of stocks at the limit; 0 when breadth is empty
fn limit_rate(count: u32, overview: &MarketOverview) -> f64 {
    let total = overview.breadth.total();
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

fn limit_up_value(overview: &MarketOverview) -> f64 {
    let rate = limit_rate(overview.breadth.limit_up, overview);
    (rate / LIMIT_RATE_SATURATION).min(1.0) * 100.0
}

fn limit_down_value(overview: &MarketOverview) -> f64 {
    let rate = limit_rate(overview.breadth.limit_down, overview);
    100.0 - (rate / LIMIT_RATE_SATURATION).min(1.0) * 100.0
}

fn index_trend_value(overview: &MarketOverview) -> f64 {
    let changes: Vec<f64> = overview.indices.iter().map(|i| i.pct_change).collect();
    match math::mean(&changes) {
        Some(mean) => (mean + INDEX_PCT_RANGE) / (2.0 * INDEX_PCT_RANGE) * 100.0,
        None => NEUTRAL,
    }
}

fn northbound_value(overview: &MarketOverview) -> f64 {
    let latest = overview.northbound.iter().max_by_key(|f| f.trade_date);
    match latest {
        Some(flow) => (flow.net_flow_million + NORTHBOUND_RANGE_MILLION) / (2.0 * NORTHBOUND_RANGE_MILLION) * 100.0,
        None => NEUTRAL,
    }
}

impl SentimentAnalyzer for MarketSentimentEngine {
    fn analyze(&self, overview: &MarketOverview) -> SentimentScore {
        self.calculate(overview)
    }
}

impl Default for MarketSentimentEngine {
    fn default() -> Self {
        Self::new()
    }
}
