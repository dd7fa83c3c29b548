//! The polling loop.
//!
//! One [`Watcher`] drives the whole pipeline on a single task:
//! fetch → filter → dedup check → notify → record, then sleep. Cycles never
//! overlap. The loop suspends in exactly two places, the fetch and the
//! inter-cycle sleep, and both race against the cancellation token so a
//! shutdown signal interrupts whichever is in flight.
//!
//! ## For contributors
//!
//! Nothing below this module returns errors to it: the source classifies
//! transport failures into [`FetchResult`], the notifier reports a
//! [`crate::notify::NotifyResult`], and store write failures are logged here
//! and swallowed. Only store *initialisation* is fatal, and that happens
//! before a `Watcher` exists.
//!
//! A matching entry that ends a cycle unrecorded (alert refused under
//! at-least-once, or a failed store write) is kept in memory and tried again
//! on every later successful fetch, including `NotModified` ones. Transport
//! failures skip the retry along with the rest of the cycle.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::filter::Filter;
use crate::notify::Notifier;
use crate::source::{Entry, FeedSource, FetchResult};
use crate::store::SeenStore;

/// Consecutive failures after which the streak is logged at error level.
pub const ERROR_ALERT_THRESHOLD: u32 = 5;

/// Largest power of two applied to the base interval.
pub const DEFAULT_EXPONENT_CAP: u32 = 6;

/// When an entry is recorded relative to its notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Record after the attempt whatever its outcome: a failed alert is
    /// never retried, and no entry is ever alerted twice.
    AtMostOnce,
    /// Record only after the provider accepted the alert: failed alerts are
    /// retried next cycle, at the risk of a duplicate.
    AtLeastOnce,
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Fetching,
    Filtering,
    Notifying,
    Recording,
    Sleeping,
    ShuttingDown,
}

/// Exponential backoff driven by the count of consecutive fetch failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    exponent_cap: u32,
    consecutive_errors: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            exponent_cap: DEFAULT_EXPONENT_CAP,
            consecutive_errors: 0,
            current: base,
        }
    }

    pub fn with_exponent_cap(mut self, cap: u32) -> Self {
        self.exponent_cap = cap.min(31);
        self
    }

    /// Count a failure and return the delay before the next attempt:
    /// `base * 2^min(errors - 1, cap)`, clamped to the ceiling.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let exponent = (self.consecutive_errors - 1).min(self.exponent_cap);
        self.current = self.base.saturating_mul(2u32.pow(exponent)).min(self.max);
        self.current
    }

    /// Reset after a successful fetch; returns the base interval.
    pub fn record_success(&mut self) -> Duration {
        self.consecutive_errors = 0;
        self.current = self.base;
        self.current
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Loop timing and delivery policy.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub base_interval: Duration,
    pub max_backoff: Duration,
    pub policy: DeliveryPolicy,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(900),
            policy: DeliveryPolicy::AtMostOnce,
        }
    }
}

/// Counters for one cycle's worth of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub matched: usize,
    pub already_seen: usize,
    pub notified: usize,
    pub notify_failed: usize,
    pub recorded: usize,
    pub record_failed: usize,
}

/// A matching entry that has not been recorded yet.
struct Pending {
    entry: Entry,
    /// The alert needs no further attempt; only the record is missing.
    alerted: bool,
}

pub struct Watcher {
    source: Box<dyn FeedSource>,
    filter: Filter,
    store: SeenStore,
    notifier: Notifier,
    policy: DeliveryPolicy,
    backoff: Backoff,
    state: WatchState,
    last_report: CycleReport,
    pending: Vec<Pending>,
}

impl Watcher {
    pub fn new(
        source: Box<dyn FeedSource>,
        filter: Filter,
        store: SeenStore,
        notifier: Notifier,
        settings: WatchSettings,
    ) -> Self {
        Self {
            source,
            filter,
            store,
            notifier,
            policy: settings.policy,
            backoff: Backoff::new(settings.base_interval, settings.max_backoff),
            state: WatchState::Idle,
            last_report: CycleReport::default(),
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    /// Counters from the most recent cycle that had entries to consider.
    pub fn last_report(&self) -> &CycleReport {
        &self.last_report
    }

    /// Number of matching entries waiting to be alerted or recorded.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "watch state");
            self.state = next;
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            source = self.source.name(),
            interval_secs = self.backoff.base.as_secs(),
            seen = self.store.len(),
            "watcher started"
        );

        loop {
            self.transition(WatchState::Fetching);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.source.fetch() => result,
            };

            let delay = self.handle_fetch(result, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            self.transition(WatchState::Sleeping);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.transition(WatchState::Idle);
        }

        self.transition(WatchState::ShuttingDown);
        info!(seen = self.store.len(), "watcher stopped");
    }

    /// Run a single cycle without sleeping; returns the delay the loop
    /// would wait before the next one.
    pub async fn run_cycle(&mut self) -> Duration {
        self.transition(WatchState::Fetching);
        let result = self.source.fetch().await;
        let delay = self.handle_fetch(result, &CancellationToken::new()).await;
        self.transition(WatchState::Idle);
        delay
    }

    async fn handle_fetch(&mut self, result: FetchResult, cancel: &CancellationToken) -> Duration {
        match result {
            FetchResult::TransportError(failure) => {
                let delay = self.backoff.record_failure();
                let errors = self.backoff.consecutive_errors();
                if errors > ERROR_ALERT_THRESHOLD {
                    error!(
                        url = %failure.url,
                        class = %failure.kind,
                        error = %failure.message,
                        consecutive_errors = errors,
                        retry_in_secs = delay.as_secs(),
                        "feed has been failing repeatedly"
                    );
                } else {
                    warn!(
                        url = %failure.url,
                        class = %failure.kind,
                        error = %failure.message,
                        consecutive_errors = errors,
                        retry_in_secs = delay.as_secs(),
                        "feed fetch failed"
                    );
                }
                delay
            }
            FetchResult::NotModified => {
                debug!("feed not modified");
                let delay = self.backoff.record_success();
                self.process_and_report(Vec::new(), cancel).await;
                delay
            }
            FetchResult::Entries { entries, .. } => {
                let delay = self.backoff.record_success();
                if entries.is_empty() {
                    debug!("feed has no entries");
                }
                self.process_and_report(entries, cancel).await;
                delay
            }
        }
    }

    async fn process_and_report(&mut self, entries: Vec<Entry>, cancel: &CancellationToken) {
        if entries.is_empty() && self.pending.is_empty() {
            return;
        }

        let report = self.process(entries, cancel).await;
        if report.matched > 0 {
            info!(
                fetched = report.fetched,
                matched = report.matched,
                already_seen = report.already_seen,
                notified = report.notified,
                notify_failed = report.notify_failed,
                record_failed = report.record_failed,
                pending = self.pending.len(),
                "cycle complete"
            );
        } else {
            debug!(fetched = report.fetched, "no matching entries");
        }
        self.last_report = report;
    }

    /// Walk the fetched entries, then any carried-over entries the feed no
    /// longer lists. Entries left unrecorded are carried to the next cycle.
    async fn process(&mut self, fetched: Vec<Entry>, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport {
            fetched: fetched.len(),
            ..CycleReport::default()
        };

        let mut carried = std::mem::take(&mut self.pending);
        let mut work = Vec::with_capacity(fetched.len() + carried.len());
        for entry in fetched {
            let alerted = match carried.iter().position(|p| p.entry.id == entry.id) {
                Some(i) => carried.remove(i).alerted,
                None => false,
            };
            work.push(Pending { entry, alerted });
        }
        work.extend(carried);

        let mut work = work.into_iter();
        while let Some(Pending { entry, alerted }) = work.next() {
            if cancel.is_cancelled() {
                debug!("shutdown requested, skipping remaining entries");
                self.carry(entry, alerted);
                for rest in work.by_ref() {
                    self.carry(rest.entry, rest.alerted);
                }
                break;
            }

            self.transition(WatchState::Filtering);
            if !self.filter.matches(&entry) {
                continue;
            }
            report.matched += 1;
            if self.store.has_seen(&entry.id) {
                report.already_seen += 1;
                continue;
            }

            // A carried entry whose alert was already settled only needs
            // its record written.
            let settled = if alerted {
                true
            } else {
                self.transition(WatchState::Notifying);
                let sent = self.notifier.notify(&entry).await.is_sent();
                if sent {
                    report.notified += 1;
                } else {
                    report.notify_failed += 1;
                }
                sent || self.policy == DeliveryPolicy::AtMostOnce
            };

            if !settled {
                self.carry(entry, false);
                continue;
            }

            self.transition(WatchState::Recording);
            match self.store.record_seen(
                &entry.id,
                &entry.title,
                entry.link.as_deref(),
                Utc::now(),
            ) {
                Ok(()) => report.recorded += 1,
                Err(err) => {
                    report.record_failed += 1;
                    error!(entry = %entry.id, error = %err, "failed to record entry, it will be reconsidered next cycle");
                    self.carry(entry, true);
                }
            }
        }

        report
    }

    fn carry(&mut self, entry: Entry, alerted: bool) {
        match self.pending.iter_mut().find(|p| p.entry.id == entry.id) {
            Some(existing) => existing.alerted |= alerted,
            None => self.pending.push(Pending { entry, alerted }),
        }
    }
}
