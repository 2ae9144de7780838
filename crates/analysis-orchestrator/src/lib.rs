use analysis_core::{
    AnalysisResult, FetchError, Granularity, MarketDataProvider, PriceBar, SentimentAnalyzer, SentimentScore,
    TechnicalAnalyzer,
};
use chrono::NaiveDate;
use market_sentiment::MarketSentimentEngine;
use std::sync::Arc;
use technical_analysis::TechnicalAnalysisEngine;
use tokio::sync::mpsc;

pub mod cache;
pub mod cancel;
pub mod coalesce;
pub mod config;
pub mod realtime;
pub mod retry;
pub mod service;
pub mod trading_hours;

#[cfg(test)]
mod mock;

pub use cache::{CacheStats, TtlCache};
pub use cancel::{CancellationCheck, CancellationToken, SubjectTicket, SubjectTracker};
pub use coalesce::RequestCoalescer;
pub use config::OrchestratorConfig;
pub use realtime::{PollerHandle, RealtimePoller, RealtimeUpdate};
pub use retry::RetryPolicy;
pub use service::MarketDataService;
pub use trading_hours::{is_market_open, is_market_open_now};

/// Ties the provider, the caching layer and the analysis engines together.
pub struct AnalysisOrchestrator<P> {
    service: MarketDataService<P>,
    technical_analyzer: TechnicalAnalysisEngine,
    sentiment_analyzer: MarketSentimentEngine,
    subjects: Arc<SubjectTracker>,
    shutdown: CancellationToken,
}

impl<P> AnalysisOrchestrator<P>
where
    P: MarketDataProvider + 'static,
{
    pub fn new(provider: Arc<P>, config: OrchestratorConfig) -> Self {
        let technical_analyzer = TechnicalAnalysisEngine::with_risk_fraction(config.risk_fraction);
        Self {
            service: MarketDataService::new(provider, config),
            technical_analyzer,
            sentiment_analyzer: MarketSentimentEngine::new(),
            subjects: Arc::new(SubjectTracker::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build with configuration read from `ASHARE_*` environment variables
    pub fn from_env(provider: Arc<P>) -> anyhow::Result<Self> {
        let config = OrchestratorConfig::from_env()?;
        Ok(Self::new(provider, config))
    }

    pub fn service(&self) -> &MarketDataService<P> {
        &self.service
    }

    /// Public accessor for the technical analysis engine
    pub fn technical_engine(&self) -> &TechnicalAnalysisEngine {
        &self.technical_analyzer
    }

    pub fn subjects(&self) -> Arc<SubjectTracker> {
        self.subjects.clone()
    }

    /// Fetch (or reuse cached) bars and run the technical engine.
    ///
    /// `Ok(None)` means the series is still too short for a signal. Cancelling
    /// the token while the fetch is pending returns a `Cancelled` error right
    /// away; the fetch keeps running and its bars still land in the cache.
    pub async fn analyze(
        &self,
        instrument: &str,
        granularity: Granularity,
        token: &CancellationToken,
    ) -> Result<Option<AnalysisResult>, FetchError> {
        token.check()?;
        let bars = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Analysis of {} {} cancelled while fetching", instrument, granularity);
                return Err(FetchError::cancelled(format!("analysis of {} cancelled", instrument)));
            }
            bars = self.service.bars(instrument, granularity) => bars?,
        };
        token.check()?;

        let result = self.technical_analyzer.analyze(&bars);
        match &result {
            Some(r) => tracing::info!(
                "{} {}: {} ({}), trade plan: {}",
                instrument,
                granularity,
                r.signal.label,
                r.signal.total,
                r.trade_plan.is_some()
            ),
            None => tracing::info!(
                "{} {}: {} bars, analysis not yet available",
                instrument,
                granularity,
                bars.len()
            ),
        }
        Ok(result)
    }

    /// `analyze` for the subject identified by `ticket`; a result whose
    /// subject changed mid-flight is discarded as `Cancelled`.
    pub async fn analyze_subject(
        &self,
        ticket: SubjectTicket,
        instrument: &str,
        granularity: Granularity,
        token: &CancellationToken,
    ) -> Result<Option<AnalysisResult>, FetchError> {
        let result = self.analyze(instrument, granularity, token).await?;
        self.subjects
            .commit(ticket, token, result)
            .ok_or_else(|| FetchError::cancelled(format!("subject changed while analyzing {}", instrument)))
    }

    pub async fn market_sentiment(
        &self,
        trade_date: NaiveDate,
        token: &CancellationToken,
    ) -> Result<SentimentScore, FetchError> {
        token.check()?;
        let overview = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(FetchError::cancelled(format!("sentiment for {} cancelled", trade_date)));
            }
            overview = self.service.overview(trade_date) => overview?,
        };

        let score = self.sentiment_analyzer.analyze(&overview);
        tracing::info!("Market sentiment {}: {} ({})", trade_date, score.total, score.label);
        Ok(score)
    }

    /// Start polling the live bar for the current subject, merging into `initial`
    pub fn start_realtime(
        &self,
        instrument: &str,
        granularity: Granularity,
        initial: Vec<PriceBar>,
        tx: mpsc::Sender<RealtimeUpdate>,
    ) -> PollerHandle {
        RealtimePoller::new(self.service.provider().clone(), instrument, granularity)
            .with_interval(self.service.config().poll_interval())
            .with_subject(self.subjects.clone(), self.subjects.current())
            .with_shutdown(&self.shutdown)
            .spawn(initial, tx)
    }

    /// Stop every realtime poller started from this orchestrator
    pub fn shutdown(&self) {
        tracing::info!("Shutting down realtime polling");
        self.shutdown.cancel();
    }

    pub fn clear_caches(&self) {
        self.service.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{
        FetchErrorKind, IndexQuote, MarketBreadth, MarketOverview, NorthboundFlow, SentimentLevel, SignalLevel,
    };
    use crate::mock::{trending_bars, MockProvider};
    use std::time::Duration;

    fn orchestrator(provider: MockProvider) -> (Arc<MockProvider>, AnalysisOrchestrator<MockProvider>) {
        let provider = Arc::new(provider);
        let orchestrator = AnalysisOrchestrator::new(provider.clone(), OrchestratorConfig::default());
        (provider, orchestrator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_returns_result_for_long_series() {
        let (_, orchestrator) = orchestrator(MockProvider::with_bars(trending_bars(120, 1.01)));

        let result = orchestrator
            .analyze("600519", Granularity::Daily, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.signal.level, SignalLevel::Buy);
        assert!(result.trade_plan.is_some());
        assert_eq!(result.indicators.ma5.len(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_series_is_not_yet_available() {
        let (_, orchestrator) = orchestrator(MockProvider::with_bars(trending_bars(30, 1.01)));

        let result = orchestrator
            .analyze("688981", Granularity::Daily, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_still_fills_cache() {
        let (provider, orchestrator) = orchestrator(
            MockProvider::with_bars(trending_bars(120, 1.01)).delayed(Duration::from_millis(100)),
        );
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            }
        };
        let started = tokio::time::Instant::now();
        let (result, _) = tokio::join!(orchestrator.analyze("600519", Granularity::Daily, &token), canceller);

        // returned on cancellation, not when the 100ms fetch finished
        assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(provider.bar_calls(), 1);

        // the abandoned fetch keeps running and fills the cache
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orchestrator.service().bars_cache_stats().entries, 1);
        assert_eq!(orchestrator.service().in_flight(), 0);

        let result = orchestrator
            .analyze("600519", Granularity::Daily, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_some());
        assert_eq!(provider.bar_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sentiment_returns_early() {
        let provider = MockProvider::default().delayed(Duration::from_millis(100));
        let (_, orchestrator) = orchestrator(provider);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        };
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let (result, _) = tokio::join!(orchestrator.market_sentiment(date, &token), canceller);

        assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_skips_fetch() {
        let (provider, orchestrator) = orchestrator(MockProvider::with_bars(trending_bars(120, 1.01)));
        let token = CancellationToken::new();
        token.cancel();

        let err = orchestrator
            .analyze("600519", Granularity::Daily, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Cancelled);
        assert_eq!(provider.bar_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subject_switch_discards_result() {
        let (_, orchestrator) = orchestrator(
            MockProvider::with_bars(trending_bars(120, 1.01)).delayed(Duration::from_millis(100)),
        );
        let subjects = orchestrator.subjects();
        let ticket = subjects.begin();
        let token = CancellationToken::new();

        let switcher = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            subjects.begin();
        };
        let (result, _) = tokio::join!(
            orchestrator.analyze_subject(ticket, "600519", Granularity::Daily, &token),
            switcher
        );
        assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);

        let current = subjects.current();
        let result = orchestrator
            .analyze_subject(current, "600519", Granularity::Daily, &token)
            .await
            .unwrap();
        assert!(result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_errors_surface_classified() {
        let (provider, orchestrator) = orchestrator(
            MockProvider::with_bars(trending_bars(120, 1.01))
                .fail_with(vec![FetchError::permission("insufficient points")]),
        );

        let err = orchestrator
            .analyze("600519", Granularity::Daily, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Permission);
        assert_eq!(provider.bar_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_sentiment() {
        let provider = MockProvider::default();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        *provider.overview.lock().unwrap() = Some(MarketOverview {
            trade_date: date,
            indices: vec![IndexQuote {
                code: "000001.SH".to_string(),
                name: "SSE Composite".to_string(),
                close: 3054.6,
                pct_change: 0.0,
            }],
            breadth: MarketBreadth {
                advancing: 2500,
                declining: 2500,
                flat: 0,
                limit_up: 75,
                limit_down: 75,
            },
            northbound: vec![NorthboundFlow {
                trade_date: date,
                net_flow_million: 0.0,
            }],
            margin: None,
            segments: vec![],
        });
        let (provider, orchestrator) = orchestrator(provider);
        let token = CancellationToken::new();

        let score = orchestrator.market_sentiment(date, &token).await.unwrap();
        assert_eq!(score.total, 50);
        assert_eq!(score.level, SentimentLevel::Neutral);

        orchestrator.market_sentiment(date, &token).await.unwrap();
        assert_eq!(provider.overview_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_overview_is_no_data() {
        let (_, orchestrator) = orchestrator(MockProvider::default());
        let date = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();

        let err = orchestrator
            .market_sentiment(date, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_realtime_pollers() {
        let (_, orchestrator) = orchestrator(MockProvider::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = orchestrator.start_realtime("600519", Granularity::Minute1, vec![], tx);

        orchestrator.shutdown();
        assert!(handle.is_stopped());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_caches_forces_refetch() {
        let (provider, orchestrator) = orchestrator(MockProvider::with_bars(trending_bars(120, 1.01)));
        let token = CancellationToken::new();

        orchestrator.analyze("600519", Granularity::Daily, &token).await.unwrap();
        orchestrator.clear_caches();
        orchestrator.analyze("600519", Granularity::Daily, &token).await.unwrap();

        assert_eq!(provider.bar_calls(), 2);
    }
}
