use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{AnalysisResult, FetchError, Granularity, MarketOverview, PriceBar, SentimentScore};

/// Upstream quote provider. Implementors own protocol details, token
/// management and unit normalization, and classify every failure.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Ascending price history for one instrument
    async fn fetch_bars(
        &self,
        instrument: &str,
        granularity: Granularity,
    ) -> Result<Vec<PriceBar>, FetchError>;

    async fn fetch_overview(&self, trade_date: NaiveDate) -> Result<MarketOverview, FetchError>;

    /// Latest snapshot of the live bar, `None` if the provider has nothing newer
    async fn fetch_latest_bar(
        &self,
        instrument: &str,
        granularity: Granularity,
    ) -> Result<Option<PriceBar>, FetchError>;
}

/// Per-instrument technical analysis. `None` means "not enough history yet".
pub trait TechnicalAnalyzer: Send + Sync {
    fn analyze(&self, bars: &[PriceBar]) -> Option<AnalysisResult>;
}

/// Market-wide sentiment scoring
pub trait SentimentAnalyzer: Send + Sync {
    fn analyze(&self, overview: &MarketOverview) -> SentimentScore;
}
