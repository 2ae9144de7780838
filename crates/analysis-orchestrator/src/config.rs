use analysis_core::Granularity;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    // Cache TTLs (seconds)
    pub ttl_short_intraday_secs: u64, // 1min / 5min: 30
    pub ttl_intraday_secs: u64,       // 15min / 30min / 60min: 120
    pub ttl_daily_secs: u64,          // 300
    pub ttl_long_secs: u64,           // weekly / monthly: 1800
    pub ttl_overview_secs: u64,       // 300

    // Cache bounds
    pub cache_capacity: usize,
    pub eviction_fraction: f64, // 0.2 = drop oldest 20%

    // Retry backoff schedule (ms), one entry per retry
    pub retry_backoff_ms: Vec<u64>,

    // Realtime polling
    pub poll_interval_ms: u64,

    // Trade plan
    pub risk_fraction: f64, // 0.02
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ttl_short_intraday_secs: 30,
            ttl_intraday_secs: 120,
            ttl_daily_secs: 300,
            ttl_long_secs: 1800,
            ttl_overview_secs: 300,
            cache_capacity: 200,
            eviction_fraction: 0.2,
            retry_backoff_ms: vec![1000, 3000],
            poll_interval_ms: 1000,
            risk_fraction: 0.02,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            ttl_short_intraday_secs: env::var("ASHARE_TTL_SHORT_INTRADAY_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            ttl_intraday_secs: env::var("ASHARE_TTL_INTRADAY_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,
            ttl_daily_secs: env::var("ASHARE_TTL_DAILY_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            ttl_long_secs: env::var("ASHARE_TTL_LONG_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            ttl_overview_secs: env::var("ASHARE_TTL_OVERVIEW_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            cache_capacity: env::var("ASHARE_CACHE_CAPACITY")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            eviction_fraction: env::var("ASHARE_CACHE_EVICTION_FRACTION")
                .unwrap_or_else(|_| "0.2".to_string())
                .parse()?,

            retry_backoff_ms: env::var("ASHARE_RETRY_BACKOFF_MS")
                .unwrap_or_else(|_| "1000,3000".to_string())
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<u64>())
                .collect::<Result<Vec<_>, _>>()?,

            poll_interval_ms: env::var("ASHARE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            risk_fraction: env::var("ASHARE_RISK_FRACTION")
                .unwrap_or_else(|_| "0.02".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            bail!("cache_capacity must be positive");
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            bail!("eviction_fraction must be in (0, 1], got {}", self.eviction_fraction);
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            bail!("risk_fraction must be in (0, 1], got {}", self.risk_fraction);
        }
        Ok(())
    }

    /// Cache lifetime for a bar series of the given granularity
    pub fn ttl_for(&self, granularity: Granularity) -> Duration {
        let secs = match granularity {
            Granularity::Minute1 | Granularity::Minute5 => self.ttl_short_intraday_secs,
            Granularity::Minute15 | Granularity::Minute30 | Granularity::Minute60 => self.ttl_intraday_secs,
            Granularity::Daily => self.ttl_daily_secs,
            Granularity::Weekly | Granularity::Monthly => self.ttl_long_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn overview_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_overview_secs)
    }

    pub fn retry_backoff(&self) -> Vec<Duration> {
        self.retry_backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
