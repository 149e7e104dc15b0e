//! Dedup/poll worker: decides whether a fetched record is a new OTP worth forwarding.
//!
//! One cycle is `Idle -> Fetching -> Evaluating -> (Formatting -> Delivering)? -> Idle`.
//! The source returns "latest record" rather than a queue, so the worker keeps a
//! process-local fingerprint of the last forwarded event and drops repeats of it.
//! The fingerprint is not persisted; a restart may re-send one stale event.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::Config,
    fanout::{DeliveryReport, FanoutEngine},
    formatting::MessageFormatter,
    source::{EventSource, SourceEvent},
};

/// Identity of a source event for dedup: origin and the source's own timestamp.
///
/// A missing timestamp contributes an empty string rather than "now", so an undated
/// record that stays on top of the source is still recognised as the same event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(event: &SourceEvent) -> Self {
        Self(format!(
            "{}_{}",
            event.origin,
            event.reported_at.as_deref().unwrap_or_default()
        ))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-insensitive substring match against a keyword set.
#[derive(Clone, Debug)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.keywords.iter().any(|k| body.contains(k.as_str()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    #[default]
    Idle,
    Fetching,
    Evaluating,
    Formatting,
    Delivering,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped_disabled: usize,
}

impl From<&DeliveryReport> for DeliverySummary {
    fn from(r: &DeliveryReport) -> Self {
        Self {
            attempted: r.attempted(),
            delivered: r.delivered(),
            failed: r.failed(),
            skipped_disabled: r.skipped_disabled,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StatusSnapshot {
    pub phase: WorkerPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    /// Distinct records evaluated. A record that stays on top is counted once.
    pub events_seen: u64,
    /// Polls that returned the already-forwarded record.
    pub duplicates_skipped: u64,
    /// Distinct records dropped by the keyword filter.
    pub filtered_out: u64,
    pub events_forwarded: u64,
    pub last_forwarded_at: Option<DateTime<Utc>>,
    pub last_delivery: Option<DeliverySummary>,
}

/// Live worker counters, shared with the command surface and the status API.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    inner: Mutex<StatusSnapshot>,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().await.clone()
    }

    async fn set_phase(&self, phase: WorkerPhase) {
        self.inner.lock().await.phase = phase;
    }

    async fn mark_started(&self) {
        let mut st = self.inner.lock().await;
        st.started_at = Some(Utc::now());
        st.phase = WorkerPhase::Idle;
    }

    /// `fresh` is whether the cycle evaluated a record different from the previous one.
    async fn record(&self, outcome: &CycleOutcome, fresh: bool) {
        let mut st = self.inner.lock().await;
        st.cycles += 1;
        st.phase = WorkerPhase::Idle;
        if fresh {
            st.events_seen += 1;
        }
        match outcome {
            CycleOutcome::NoEvent => {}
            CycleOutcome::Duplicate => st.duplicates_skipped += 1,
            CycleOutcome::Filtered => {
                if fresh {
                    st.filtered_out += 1;
                }
            }
            CycleOutcome::Delivered(report) => {
                st.events_forwarded += 1;
                st.last_forwarded_at = Some(Utc::now());
                st.last_delivery = Some(DeliverySummary::from(report));
            }
        }
    }
}

/// What one poll cycle did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    NoEvent,
    Duplicate,
    Filtered,
    Delivered(DeliveryReport),
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub keywords: KeywordFilter,
}

impl From<&Config> for WorkerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            interval: cfg.poll_interval,
            keywords: KeywordFilter::new(&cfg.otp_keywords),
        }
    }
}

pub struct PollWorker {
    source: Arc<dyn EventSource>,
    formatter: Arc<dyn MessageFormatter>,
    fanout: FanoutEngine,
    settings: WorkerSettings,
    status: Arc<WorkerStatus>,
    cursor: Option<Fingerprint>,
    /// Last record evaluated, forwarded or not. Only feeds the status counters.
    last_seen: Option<Fingerprint>,
}

impl PollWorker {
    pub fn new(
        source: Arc<dyn EventSource>,
        formatter: Arc<dyn MessageFormatter>,
        fanout: FanoutEngine,
        settings: WorkerSettings,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            source,
            formatter,
            fanout,
            settings,
            status,
            cursor: None,
            last_seen: None,
        }
    }

    /// Run exactly one cycle, without the trailing sleep.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let (outcome, fresh) = match self.cycle().await {
            Some((outcome, fingerprint)) => {
                let fresh = self.last_seen.as_ref() != Some(&fingerprint);
                self.last_seen = Some(fingerprint);
                (outcome, fresh)
            }
            None => (CycleOutcome::NoEvent, false),
        };
        self.status.record(&outcome, fresh).await;
        outcome
    }

    /// `None` when the source had nothing.
    async fn cycle(&mut self) -> Option<(CycleOutcome, Fingerprint)> {
        self.status.set_phase(WorkerPhase::Fetching).await;
        let event = self.source.fetch_latest().await?;

        self.status.set_phase(WorkerPhase::Evaluating).await;
        let fingerprint = Fingerprint::of(&event);
        if self.cursor.as_ref() == Some(&fingerprint) {
            debug!(fingerprint = %fingerprint, "latest record already forwarded");
            return Some((CycleOutcome::Duplicate, fingerprint));
        }
        if !self.settings.keywords.matches(&event.body) {
            debug!(fingerprint = %fingerprint, "no OTP keyword in record, skipping");
            return Some((CycleOutcome::Filtered, fingerprint));
        }

        self.status.set_phase(WorkerPhase::Formatting).await;
        let html = self.formatter.format(&event);

        self.status.set_phase(WorkerPhase::Delivering).await;
        let report = self.fanout.deliver(&html).await;

        // Set even when some sends failed, so one bad destination cannot cause a resend loop.
        self.cursor = Some(fingerprint.clone());
        Some((CycleOutcome::Delivered(report), fingerprint))
    }

    /// Poll until `cancel` fires. Cancellation is observed between cycles.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.status.mark_started().await;
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "poll worker started"
        );

        while !cancel.is_cancelled() {
            self.poll_once().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.interval) => {}
            }
        }

        self.status.set_phase(WorkerPhase::Stopped).await;
        info!("poll worker stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
