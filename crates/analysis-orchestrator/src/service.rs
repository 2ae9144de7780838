use analysis_core::{sort_and_dedup, FetchError, Granularity, MarketDataProvider, MarketOverview, PriceBar};
use chrono::NaiveDate;
use std::sync::Arc;

use crate::cache::{CacheStats, TtlCache};
use crate::coalesce::RequestCoalescer;
use crate::config::OrchestratorConfig;
use crate::retry::RetryPolicy;

type BarsKey = (String, Granularity);

/// Cached, deduplicated, retrying access to a market data provider.
///
/// Flow per request: cache -> in-flight coalescing -> retry(provider) -> cache
/// insert on success. Errors are never cached.
pub struct MarketDataService<P> {
    provider: Arc<P>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
    bars_cache: Arc<TtlCache<BarsKey, Arc<Vec<PriceBar>>>>,
    overview_cache: Arc<TtlCache<NaiveDate, Arc<MarketOverview>>>,
    bars_in_flight: RequestCoalescer<BarsKey, Arc<Vec<PriceBar>>>,
    overview_in_flight: RequestCoalescer<NaiveDate, Arc<MarketOverview>>,
}

impl<P> MarketDataService<P>
where
    P: MarketDataProvider + 'static,
{
    pub fn new(provider: Arc<P>, config: OrchestratorConfig) -> Self {
        let retry = RetryPolicy::new(config.retry_backoff());
        let bars_cache = TtlCache::new(
            config.ttl_for(Granularity::Daily),
            config.cache_capacity,
            config.eviction_fraction,
        );
        let overview_cache = TtlCache::new(config.overview_ttl(), config.cache_capacity, config.eviction_fraction);

        Self {
            provider,
            config,
            retry,
            bars_cache: Arc::new(bars_cache),
            overview_cache: Arc::new(overview_cache),
            bars_in_flight: RequestCoalescer::new(),
            overview_in_flight: RequestCoalescer::new(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Bar series for `(instrument, granularity)`, sorted ascending without
    /// duplicate timestamps. An empty series is a `NoData` error.
    pub async fn bars(&self, instrument: &str, granularity: Granularity) -> Result<Arc<Vec<PriceBar>>, FetchError> {
        let key: BarsKey = (instrument.to_string(), granularity);
        if let Some(bars) = self.bars_cache.get(&key) {
            tracing::debug!("Bars cache hit for {} {}", instrument, granularity);
            return Ok(bars);
        }
        tracing::debug!("Bars cache miss for {} {}", instrument, granularity);

        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let cache = self.bars_cache.clone();
        let ttl = self.config.ttl_for(granularity);
        let cache_key = key.clone();

        self.bars_in_flight
            .run(key, move || async move {
                let (instrument, granularity) = &cache_key;
                let mut bars = retry
                    .retry("fetch_bars", || provider.fetch_bars(instrument, *granularity))
                    .await?;

                if bars.is_empty() {
                    return Err(FetchError::no_data(format!(
                        "No {} bars for {}",
                        granularity, instrument
                    )));
                }
                sort_and_dedup(&mut bars);

                tracing::info!("Fetched {} {} bars for {}", bars.len(), granularity, instrument);
                let bars = Arc::new(bars);
                cache.insert_with_ttl(cache_key.clone(), bars.clone(), ttl);
                Ok(bars)
            })
            .await
    }

    /// Market overview for one trade date
    pub async fn overview(&self, trade_date: NaiveDate) -> Result<Arc<MarketOverview>, FetchError> {
        if let Some(overview) = self.overview_cache.get(&trade_date) {
            tracing::debug!("Overview cache hit for {}", trade_date);
            return Ok(overview);
        }

        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let cache = self.overview_cache.clone();

        self.overview_in_flight
            .run(trade_date, move || async move {
                let overview = retry
                    .retry("fetch_overview", || provider.fetch_overview(trade_date))
                    .await?;

                let overview = Arc::new(overview);
                cache.insert(trade_date, overview.clone());
                Ok(overview)
            })
            .await
    }

    /// Drop cached bars of every granularity for one instrument
    pub fn invalidate_bars(&self, instrument: &str) -> usize {
        let removed = self.bars_cache.invalidate_where(|(code, _)| code == instrument);
        tracing::debug!("Invalidated {} cached series for {}", removed, instrument);
        removed
    }

    pub fn clear(&self) {
        self.bars_cache.clear();
        self.overview_cache.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.bars_cache.purge_expired() + self.overview_cache.purge_expired()
    }

    pub fn bars_cache_stats(&self) -> CacheStats {
        self.bars_cache.stats()
    }

    pub fn overview_cache_stats(&self) -> CacheStats {
        self.overview_cache.stats()
    }

    pub fn in_flight(&self) -> usize {
        self.bars_in_flight.in_flight() + self.overview_in_flight.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{trending_bars, MockProvider};
    use analysis_core::FetchErrorKind;
    use std::time::Duration;

    fn service(provider: MockProvider) -> (Arc<MockProvider>, MarketDataService<MockProvider>) {
        let provider = Arc::new(provider);
        let service = MarketDataService::new(provider.clone(), OrchestratorConfig::default());
        (provider, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_fetch_within_ttl_hits_cache() {
        let (provider, service) = service(MockProvider::with_bars(trending_bars(80, 1.01)));

        let first = service.bars("600519", Granularity::Daily).await.unwrap();
        let second = service.bars("600519", Granularity::Daily).await.unwrap();

        assert_eq!(provider.bar_calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.bars_cache_stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_after_ttl_goes_upstream() {
        let (provider, service) = service(MockProvider::with_bars(trending_bars(80, 1.01)));

        service.bars("600519", Granularity::Minute1).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        service.bars("600519", Granularity::Minute1).await.unwrap();

        assert_eq!(provider.bar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_granularity_is_part_of_the_key() {
        let (provider, service) = service(MockProvider::with_bars(trending_bars(80, 1.01)));

        service.bars("600519", Granularity::Daily).await.unwrap();
        service.bars("600519", Granularity::Weekly).await.unwrap();

        assert_eq!(provider.bar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_coalesced() {
        let (provider, service) = service(
            MockProvider::with_bars(trending_bars(80, 1.01)).delayed(Duration::from_millis(200)),
        );

        let (a, b, c) = tokio::join!(
            service.bars("600519", Granularity::Daily),
            service.bars("600519", Granularity::Daily),
            service.bars("600519", Granularity::Daily),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(provider.bar_calls(), 1);
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_are_retried() {
        let (provider, service) = service(
            MockProvider::with_bars(trending_bars(80, 1.01))
                .fail_with(vec![FetchError::network("reset"), FetchError::unknown("HTTP 500")]),
        );

        let bars = service.bars("600519", Granularity::Daily).await.unwrap();
        assert_eq!(bars.len(), 80);
        assert_eq!(provider.bar_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_fails_fast_and_is_not_cached() {
        let (provider, service) = service(
            MockProvider::with_bars(trending_bars(80, 1.01)).fail_with(vec![FetchError::auth("bad token")]),
        );

        let err = service.bars("600519", Granularity::Daily).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Auth);
        assert_eq!(provider.bar_calls(), 1);

        // failure was not cached
        assert!(service.bars("600519", Granularity::Daily).await.is_ok());
        assert_eq!(provider.bar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_not_cached() {
        let (provider, service) = service(MockProvider::with_bars(trending_bars(80, 1.01)).fail_with(vec![
            FetchError::network("reset"),
            FetchError::network("reset"),
            FetchError::network("reset"),
        ]));

        let err = service.bars("600519", Granularity::Daily).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
        assert_eq!(provider.bar_calls(), 3);
        assert_eq!(service.bars_cache_stats().entries, 0);

        // next request goes upstream again instead of replaying the failure
        let bars = service.bars("600519", Granularity::Daily).await.unwrap();
        assert_eq!(bars.len(), 80);
        assert_eq!(provider.bar_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_still_fills_cache() {
        let (provider, service) = service(
            MockProvider::with_bars(trending_bars(80, 1.01)).delayed(Duration::from_millis(100)),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(50), service.bars("600519", Granularity::Daily)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.in_flight(), 0);
        assert_eq!(service.bars_cache_stats().entries, 1);
        assert_eq!(provider.bar_calls(), 1);

        // past the daily TTL a new caller starts a fresh fetch
        tokio::time::sleep(Duration::from_secs(600)).await;
        service.bars("600519", Granularity::Daily).await.unwrap();
        assert_eq!(provider.bar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_series_is_no_data_and_not_cached() {
        let (provider, service) = service(MockProvider::with_bars(vec![]));

        let err = service.bars("688981", Granularity::Daily).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NoData);

        service.bars("688981", Granularity::Daily).await.unwrap_err();
        assert_eq!(provider.bar_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_is_sorted_and_deduplicated() {
        let mut bars = trending_bars(5, 1.01);
        bars.reverse();
        bars.push(bars[0].clone());
        let (_, service) = service(MockProvider::with_bars(bars));

        let series = service.bars("600519", Granularity::Daily).await.unwrap();
        assert_eq!(series.len(), 5);
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let (provider, service) = service(MockProvider::with_bars(trending_bars(80, 1.01)));

        service.bars("600519", Granularity::Daily).await.unwrap();
        service.bars("600519", Granularity::Minute5).await.unwrap();
        service.bars("000858", Granularity::Daily).await.unwrap();

        assert_eq!(service.invalidate_bars("600519"), 2);
        service.bars("000858", Granularity::Daily).await.unwrap();
        assert_eq!(provider.bar_calls(), 3);

        service.clear();
        service.bars("000858", Granularity::Daily).await.unwrap();
        assert_eq!(provider.bar_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_is_cached_per_date() {
        let provider = MockProvider::default();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        *provider.overview.lock().unwrap() = Some(MarketOverview {
            trade_date: date,
            indices: vec![],
            breadth: Default::default(),
            northbound: vec![],
            margin: None,
            segments: vec![],
        });
        let (provider, service) = service(provider);

        service.overview(date).await.unwrap();
        service.overview(date).await.unwrap();
        assert_eq!(provider.overview_calls(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        service.overview(date).await.unwrap();
        assert_eq!(provider.overview_calls(), 2);
    }
}
