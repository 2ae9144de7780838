use analysis_core::{merge_realtime_bar, Granularity, MarketDataProvider, MergeOutcome, PriceBar};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cancel::{SubjectTicket, SubjectTracker};
use crate::trading_hours;

/// A live bar merged into the series
#[derive(Debug, Clone)]
pub struct RealtimeUpdate {
    pub instrument: String,
    pub granularity: Granularity,
    pub bar: PriceBar,
    pub outcome: MergeOutcome,
    pub series: Arc<Vec<PriceBar>>,
}

/// Fixed-interval poller for the live bar of one instrument.
///
/// At most one fetch is outstanding; a tick that fires while the previous
/// fetch is still running is skipped. Nothing is fetched or emitted while
/// the session gate reports the market closed.
pub struct RealtimePoller<P> {
    provider: Arc<P>,
    instrument: String,
    granularity: Granularity,
    interval: Duration,
    session_gate: fn(DateTime<Utc>) -> bool,
    subject: Option<(Arc<SubjectTracker>, SubjectTicket)>,
    shutdown: CancellationToken,
}

impl<P> RealtimePoller<P>
where
    P: MarketDataProvider + 'static,
{
    pub fn new(provider: Arc<P>, instrument: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            provider,
            instrument: instrument.into(),
            granularity,
            interval: Duration::from_secs(1),
            session_gate: trading_hours::is_market_open,
            subject: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_session_gate(mut self, gate: fn(DateTime<Utc>) -> bool) -> Self {
        self.session_gate = gate;
        self
    }

    /// Only emit while `ticket` is the tracker's current subject
    pub fn with_subject(mut self, tracker: Arc<SubjectTracker>, ticket: SubjectTicket) -> Self {
        self.subject = Some((tracker, ticket));
        self
    }

    /// Stop when `parent` is cancelled as well as through the handle
    pub fn with_shutdown(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    /// Start polling, merging live bars into `initial` and sending each
    /// accepted merge on `tx`.
    pub fn spawn(self, initial: Vec<PriceBar>, tx: mpsc::Sender<RealtimeUpdate>) -> PollerHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run(initial, tx));

        PollerHandle {
            shutdown,
            task: Some(task),
        }
    }

    async fn run(self, initial: Vec<PriceBar>, tx: mpsc::Sender<RealtimeUpdate>) {
        let shutdown = self.shutdown.clone();
        let poller = Arc::new(self);
        let series = Arc::new(Mutex::new(initial));
        let in_flight = Arc::new(AtomicBool::new(false));

        let mut ticker = time::interval(poller.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Realtime polling started for {} {} every {:?}",
            poller.instrument,
            poller.granularity,
            poller.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.is_closed() {
                        break;
                    }
                    if !(poller.session_gate)(Utc::now()) {
                        tracing::trace!("Market closed, skipping poll for {}", poller.instrument);
                        continue;
                    }
                    if in_flight.swap(true, Ordering::AcqRel) {
                        tracing::debug!("Previous poll for {} still outstanding, skipping tick", poller.instrument);
                        continue;
                    }

                    tokio::spawn(poll_once(
                        poller.clone(),
                        series.clone(),
                        in_flight.clone(),
                        tx.clone(),
                    ));
                }
            }
        }

        tracing::info!("Realtime polling stopped for {} {}", poller.instrument, poller.granularity);
    }

    fn accepts_output(&self) -> bool {
        if !(self.session_gate)(Utc::now()) {
            return false;
        }
        match &self.subject {
            Some((tracker, ticket)) => tracker.is_current(*ticket),
            None => true,
        }
    }
}

async fn poll_once<P>(
    poller: Arc<RealtimePoller<P>>,
    series: Arc<Mutex<Vec<PriceBar>>>,
    in_flight: Arc<AtomicBool>,
    tx: mpsc::Sender<RealtimeUpdate>,
) where
    P: MarketDataProvider + 'static,
{
    let fetched = poller
        .provider
        .fetch_latest_bar(&poller.instrument, poller.granularity)
        .await;

    let update = match fetched {
        Ok(Some(bar)) => merge_into(&poller, &series, bar),
        Ok(None) => None,
        Err(e) => {
            // the next tick is the retry
            tracing::warn!("Realtime fetch for {} failed: {}", poller.instrument, e);
            None
        }
    };

    if let Some(update) = update {
        if !poller.shutdown.is_cancelled() && poller.accepts_output() && tx.send(update).await.is_err() {
            tracing::debug!("Realtime receiver for {} dropped", poller.instrument);
        }
    }

    in_flight.store(false, Ordering::Release);
}

fn merge_into<P>(poller: &RealtimePoller<P>, series: &Mutex<Vec<PriceBar>>, bar: PriceBar) -> Option<RealtimeUpdate> {
    let mut series = match series.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let outcome = merge_realtime_bar(&mut series, bar.clone());
    if outcome == MergeOutcome::Ignored {
        tracing::debug!("Ignoring out-of-order bar at {} for {}", bar.timestamp, poller.instrument);
        return None;
    }

    Some(RealtimeUpdate {
        instrument: poller.instrument.clone(),
        granularity: poller.granularity,
        bar,
        outcome,
        series: Arc::new(series.clone()),
    })
}

/// Handle to a running poller. Dropping it stops the loop.
pub struct PollerHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Realtime poller task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
