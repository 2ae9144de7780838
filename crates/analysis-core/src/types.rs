use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data. `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub amount: Option<f64>,
}

impl PriceBar {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// What happened when a realtime snapshot was merged into a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Snapshot carried the same timestamp as the live bar and replaced it
    Replaced,
    /// Snapshot opened a new bar
    Appended,
    /// Snapshot was older than the live bar; past bars are never edited
    Ignored,
}

/// Merge a realtime snapshot into an ascending series.
pub fn merge_realtime_bar(series: &mut Vec<PriceBar>, bar: PriceBar) -> MergeOutcome {
    match series.last_mut() {
        Some(last) if last.timestamp == bar.timestamp => {
            *last = bar;
            MergeOutcome::Replaced
        }
        Some(last) if last.timestamp > bar.timestamp => MergeOutcome::Ignored,
        _ => {
            series.push(bar);
            MergeOutcome::Appended
        }
    }
}

/// Sort ascending by timestamp, keeping the last bar seen for each timestamp.
pub fn sort_and_dedup(series: &mut Vec<PriceBar>) {
    // stable sort keeps arrival order within equal timestamps
    series.sort_by_key(|b| b.timestamp);
    let mut deduped: Vec<PriceBar> = Vec::with_capacity(series.len());
    for bar in series.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => deduped.push(bar),
        }
    }
    *series = deduped;
}

/// Bar granularity requested from the quote provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Minute60,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Granularity::Minute1 => 1,
            Granularity::Minute5 => 5,
            Granularity::Minute15 => 15,
            Granularity::Minute30 => 30,
            Granularity::Minute60 => 60,
            Granularity::Daily => 1440,
            Granularity::Weekly => 10080,
            Granularity::Monthly => 43200,
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.to_minutes() < 1440
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute1 => "1min",
            Granularity::Minute5 => "5min",
            Granularity::Minute15 => "15min",
            Granularity::Minute30 => "30min",
            Granularity::Minute60 => "60min",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator output parallel to the price series; `None` inside the warm-up window.
pub type IndicatorSeries = Vec<Option<f64>>;

/// MACD lines (DIF / DEA / histogram)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdSeries {
    pub dif: IndicatorSeries,
    pub dea: IndicatorSeries,
    pub histogram: IndicatorSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KdjSeries {
    pub k: IndicatorSeries,
    pub d: IndicatorSeries,
    pub j: IndicatorSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BollingerSeries {
    pub upper: IndicatorSeries,
    pub middle: IndicatorSeries,
    pub lower: IndicatorSeries,
}

/// Every indicator the signal engine reads, computed once per analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub ma5: IndicatorSeries,
    pub ma10: IndicatorSeries,
    pub ma20: IndicatorSeries,
    pub ma60: IndicatorSeries,
    pub macd: MacdSeries,
    pub rsi: IndicatorSeries,
    pub kdj: KdjSeries,
    pub bollinger: BollingerSeries,
    pub obv: IndicatorSeries,
    pub vwap: IndicatorSeries,
    pub atr: IndicatorSeries,
}

/// Discrete classification of the composite signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalLevel {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl SignalLevel {
    pub fn to_label(&self) -> &'static str {
        match self {
            SignalLevel::StrongBuy => "Strong Buy",
            SignalLevel::Buy => "Buy",
            SignalLevel::Neutral => "Neutral",
            SignalLevel::Sell => "Sell",
            SignalLevel::StrongSell => "Strong Sell",
        }
    }
}

/// Composite signal: four bounded dimensions summed into `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub total: i32,
    pub trend: i32,
    pub oscillator: i32,
    pub volume: i32,
    pub support_resistance: i32,
    pub level: SignalLevel,
    pub label: String,
    /// Sub-rules that fired, in evaluation order
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
    pub risk_reward_ratio: f64,
    /// Percent of portfolio, 0 to 25
    pub position_size_pct: f64,
    pub atr_value: f64,
    pub direction: Direction,
}

/// Clustered support/resistance levels, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SrLevels {
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
}

impl SrLevels {
    pub fn is_empty(&self) -> bool {
        self.support.is_empty() && self.resistance.is_empty()
    }
}

/// Per-instrument output handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub signal: SignalScore,
    pub trade_plan: Option<TradePlan>,
    pub indicators: IndicatorSet,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
}

/// Index quote within a market overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub code: String,
    pub name: String,
    pub close: f64,
    pub pct_change: f64,
}

/// Advance/decline and limit counts for the whole market
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketBreadth {
    pub advancing: u32,
    pub declining: u32,
    pub flat: u32,
    pub limit_up: u32,
    pub limit_down: u32,
}

impl MarketBreadth {
    /// Widened so provider counts can never overflow the sum
    pub fn total(&self) -> u64 {
        u64::from(self.advancing) + u64::from(self.declining) + u64::from(self.flat)
    }
}

/// Daily northbound (Stock Connect) net flow, in million CNY
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NorthboundFlow {
    pub trade_date: NaiveDate,
    pub net_flow_million: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginBalance {
    pub trade_date: NaiveDate,
    pub financing_balance: f64,
    pub securities_lending_balance: f64,
}

/// Board / segment statistics (main board, ChiNext, STAR...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStat {
    pub name: String,
    pub turnover: f64,
    pub pct_change: f64,
}

/// Market-wide snapshot for one trade date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub indices: Vec<IndexQuote>,
    #[serde(default)]
    pub breadth: MarketBreadth,
    #[serde(default)]
    pub northbound: Vec<NorthboundFlow>,
    #[serde(default)]
    pub margin: Option<MarginBalance>,
    #[serde(default)]
    pub segments: Vec<SegmentStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLevel {
    Freezing,
    Cold,
    Neutral,
    Warm,
    Hot,
}

impl SentimentLevel {
    pub fn from_total(total: i32) -> Self {
        match total {
            t if t >= 80 => SentimentLevel::Hot,
            t if t >= 60 => SentimentLevel::Warm,
            t if t >= 40 => SentimentLevel::Neutral,
            t if t >= 20 => SentimentLevel::Cold,
            _ => SentimentLevel::Freezing,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            SentimentLevel::Freezing => "Freezing",
            SentimentLevel::Cold => "Cold",
            SentimentLevel::Neutral => "Neutral",
            SentimentLevel::Warm => "Warm",
            SentimentLevel::Hot => "Hot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentComponent {
    pub name: String,
    /// Normalized to 0-100
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub total: i32,
    pub level: SentimentLevel,
    pub label: String,
    pub components: Vec<SentimentComponent>,
}

impl SentimentScore {
    pub fn component(&self, name: &str) -> Option<&SentimentComponent> {
        self.components.iter().find(|c| c.name == name)
    }
}
