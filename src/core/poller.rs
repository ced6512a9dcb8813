//! Polling loops for recently played and currently playing
//!
//! Both loops are sequential and never terminate on their own. Failures are
//! mapped onto a delay before the next call; a success resets the backoff.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::ingest::{IngestReport, Ingestor, NowPlayingOutcome};
use crate::config::PollerSettings;
use crate::errors::{HistoryError, HistoryResult};
use crate::spotify::PlaybackApi;

/// Capped exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    pub fn from_settings(settings: &PollerSettings) -> Self {
        Self::new(settings.backoff_base(), settings.backoff_max())
    }

    /// Upper bound for the current attempt, before jitter
    fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for the next retry, somewhere in the upper half of the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// How long to wait after `err` before the next call.
///
/// `None` means the failure does not change the cadence.
async fn failure_delay(
    api: &dyn PlaybackApi,
    settings: &PollerSettings,
    backoff: &mut Backoff,
    what: &str,
    err: &HistoryError,
) -> Option<Duration> {
    match err {
        HistoryError::RateLimited { retry_after } => {
            warn!(poller = what, retry_after = ?retry_after, "Rate limited");
            Some(*retry_after)
        }
        HistoryError::Unauthorized(msg) => {
            api.invalidate_token().await;
            let delay = backoff.next_delay();
            warn!(poller = what, delay = ?delay, "Unauthorized, token dropped: {}", msg);
            Some(delay)
        }
        HistoryError::Transient(msg) | HistoryError::Config(msg) => {
            let delay = backoff.next_delay();
            warn!(poller = what, attempt = backoff.attempt(), delay = ?delay, "Transient failure: {}", msg);
            Some(delay)
        }
        HistoryError::MalformedPayload(msg) => {
            warn!(poller = what, "Ignoring malformed payload: {}", msg);
            None
        }
        HistoryError::StoreUnavailable(msg) => {
            error!(poller = what, "Store unavailable: {}", msg);
            Some(settings.store_retry())
        }
    }
}

/// Polls the recently played endpoint on a fixed cadence
pub struct RecentPoller {
    api: Arc<dyn PlaybackApi>,
    ingestor: Arc<Ingestor>,
    settings: PollerSettings,
}

impl RecentPoller {
    pub fn new(api: Arc<dyn PlaybackApi>, ingestor: Arc<Ingestor>, settings: PollerSettings) -> Self {
        Self {
            api,
            ingestor,
            settings,
        }
    }

    /// One fetch and ingest
    pub async fn poll_once(&self) -> HistoryResult<IngestReport> {
        let batch = self.api.recently_played(self.settings.recent_limit).await?;
        self.ingestor.ingest_recent(batch).await
    }

    /// Run forever
    pub async fn run(self) {
        let mut backoff = Backoff::from_settings(&self.settings);
        info!(
            interval = ?self.settings.recent_interval(),
            limit = self.settings.recent_limit,
            "Recently played poller started"
        );

        loop {
            let delay = match self.poll_once().await {
                Ok(report) => {
                    backoff.reset();
                    if report.inserted > 0 {
                        info!(inserted = report.inserted, fetched = report.fetched, "Recently played poll stored new plays");
                    }
                    self.settings.recent_interval()
                }
                Err(e) => failure_delay(self.api.as_ref(), &self.settings, &mut backoff, "recent", &e)
                    .await
                    .unwrap_or_else(|| self.settings.recent_interval()),
            };
            sleep(delay).await;
        }
    }
}

/// What one currently-playing poll saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowPlayingTick {
    Idle,
    Playing(NowPlayingOutcome),
}

/// Cadence while nothing is playing
pub fn idle_delay(settings: &PollerSettings, idle_for: Duration) -> Duration {
    if idle_for >= settings.idle_slow_after() {
        settings.idle_slow_interval()
    } else {
        settings.idle_interval()
    }
}

/// Polls the currently playing endpoint, fast while playing and slower when idle
pub struct NowPlayingPoller {
    api: Arc<dyn PlaybackApi>,
    ingestor: Arc<Ingestor>,
    settings: PollerSettings,
}

impl NowPlayingPoller {
    pub fn new(api: Arc<dyn PlaybackApi>, ingestor: Arc<Ingestor>, settings: PollerSettings) -> Self {
        Self {
            api,
            ingestor,
            settings,
        }
    }

    pub async fn poll_once(&self) -> HistoryResult<NowPlayingTick> {
        match self.api.currently_playing().await? {
            Some(now) if now.is_playing => {
                let outcome = self.ingestor.ingest_now_playing(&now.event).await?;
                Ok(NowPlayingTick::Playing(outcome))
            }
            _ => Ok(NowPlayingTick::Idle),
        }
    }

    /// Run forever
    pub async fn run(self) {
        let mut backoff = Backoff::from_settings(&self.settings);
        let mut idle_since: Option<Instant> = None;
        info!("Currently playing poller started");

        loop {
            let delay = match self.poll_once().await {
                Ok(NowPlayingTick::Playing(outcome)) => {
                    backoff.reset();
                    idle_since = None;
                    if let NowPlayingOutcome::AlreadyRecorded(at) = outcome {
                        debug!(stored_at = at, "Current track already recorded");
                    }
                    self.settings.now_playing_interval()
                }
                Ok(NowPlayingTick::Idle) => {
                    backoff.reset();
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    let delay = idle_delay(&self.settings, since.elapsed());
                    debug!(idle_for = ?since.elapsed(), next = ?delay, "Nothing playing");
                    delay
                }
                Err(e) => failure_delay(self.api.as_ref(), &self.settings, &mut backoff, "now_playing", &e)
                    .await
                    .unwrap_or_else(|| self.settings.now_playing_interval()),
            };
            sleep(delay).await;
        }
    }
}
