//! Scriptable in-memory provider for tests.

use analysis_core::{FetchError, Granularity, MarketDataProvider, MarketOverview, PriceBar};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MockProvider {
    pub bars: Mutex<Vec<PriceBar>>,
    pub overview: Mutex<Option<MarketOverview>>,
    /// Errors returned, in order, before any success
    pub failures: Mutex<VecDeque<FetchError>>,
    /// Live snapshots handed out by `fetch_latest_bar`
    pub latest: Mutex<VecDeque<PriceBar>>,
    pub delay: Duration,
    pub bar_calls: AtomicUsize,
    pub overview_calls: AtomicUsize,
    pub latest_calls: AtomicUsize,
}

impl MockProvider {
    pub fn with_bars(bars: Vec<PriceBar>) -> Self {
        Self {
            bars: Mutex::new(bars),
            ..Self::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_with(self, errors: Vec<FetchError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn bar_calls(&self) -> usize {
        self.bar_calls.load(Ordering::SeqCst)
    }

    pub fn overview_calls(&self) -> usize {
        self.overview_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<FetchError> {
        self.failures.lock().unwrap().pop_front()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_bars(&self, _instrument: &str, _granularity: Granularity) -> Result<Vec<PriceBar>, FetchError> {
        self.bar_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        Ok(self.bars.lock().unwrap().clone())
    }

    async fn fetch_overview(&self, trade_date: NaiveDate) -> Result<MarketOverview, FetchError> {
        self.overview_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.overview
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FetchError::no_data(format!("no overview for {}", trade_date)))
    }

    async fn fetch_latest_bar(
        &self,
        _instrument: &str,
        _granularity: Granularity,
    ) -> Result<Option<PriceBar>, FetchError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.latest.lock().unwrap().pop_front())
    }
}

/// Geometric daily series with a 1% band around each close
pub(crate) fn trending_bars(n: usize, growth: f64) -> Vec<PriceBar> {
    (0..n)
        .map(|i| {
            let close = 10.0 * growth.powi(i as i32);
            PriceBar {
                timestamp: 1_700_000_000_000 + i as i64 * 86_400_000,
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 1_000_000.0,
                amount: None,
            }
        })
        .collect()
}
