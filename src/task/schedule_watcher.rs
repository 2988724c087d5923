//! Background task that re-checks subscriptions and notifies owners about changes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio::time::sleep;
use tracing::Instrument;
use tracing::info_span;

use crate::config::NotifyFailurePolicy;
use crate::config::SchedulerConfig;
use crate::detector::fingerprint;
use crate::detector::has_changed;
use crate::entity::CheckOutcome;
use crate::entity::SubscriptionModel;
use crate::notifier::Notifier;
use crate::repository::Repository;
use crate::repository::error::DatabaseError;
use crate::scrape::ScheduleSource;
use crate::scrape::error::ScrapeError;

/// Counters for one tick, mostly for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub notified: usize,
    pub failed: usize,
    pub quarantined: usize,
    /// Failures caused by the browser not starting at all.
    pub launch_failures: usize,
    /// Subscriptions whose new state could not be written.
    pub store_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckResult {
    Unchanged,
    Changed { delivered: bool },
    Failed { quarantined: bool, launch_failure: bool },
    /// The fetch resource was shut down under us; nothing was recorded.
    Skipped,
}

impl TickReport {
    fn record(&mut self, result: CheckResult) {
        match result {
            CheckResult::Unchanged => self.unchanged += 1,
            CheckResult::Changed { delivered } => {
                self.changed += 1;
                if delivered {
                    self.notified += 1;
                }
            }
            CheckResult::Failed {
                quarantined,
                launch_failure,
            } => {
                self.failed += 1;
                if quarantined {
                    self.quarantined += 1;
                }
                if launch_failure {
                    self.launch_failures += 1;
                }
            }
            CheckResult::Skipped => {}
        }
    }
}

/// The scheduler loop.
///
/// Every `check_interval` it takes the least recently checked batch of
/// non-quarantined subscriptions and runs each through
/// fetch, fingerprint, compare, notify, record. Subscriptions are processed one
/// at a time with a pause in between so the shared browser and the remote site
/// see one request at a time.
pub struct ScheduleWatcher {
    repository: Arc<Repository>,
    source: Arc<dyn ScheduleSource>,
    notifier: Arc<Notifier>,
    config: SchedulerConfig,
    running: AtomicBool,
    stop_requested: AtomicBool,
    /// Bumped by every start and stop. A loop exits once it no longer owns the current value.
    generation: AtomicU64,
    tick_lock: Mutex<()>,
}

impl ScheduleWatcher {
    pub fn new(
        repository: Arc<Repository>,
        source: Arc<dyn ScheduleSource>,
        notifier: Arc<Notifier>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        info!(
            "Initializing ScheduleWatcher with interval {:?}, batch size {} and source {}",
            config.check_interval,
            config.batch_size,
            source.name()
        );
        Arc::new(Self {
            repository,
            source,
            notifier,
            config,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            tick_lock: Mutex::new(()),
        })
    }

    /// Starts the check loop.
    pub fn start(self: Arc<Self>) -> anyhow::Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            self.running.store(true, Ordering::SeqCst);
            self.stop_requested.store(false, Ordering::SeqCst);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Starting ScheduleWatcher check loop.");
            self.spawn_check_loop(generation);
        }
        Ok(())
    }

    /// Stops the check loop after the subscription currently being checked.
    pub fn stop(self: Arc<Self>) -> anyhow::Result<()> {
        info!("Stopping ScheduleWatcher check loop.");
        self.running.store(false, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn owns_loop(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    fn spawn_check_loop(self: Arc<Self>, generation: u64) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            let mut tick: u64 = 0;
            loop {
                interval.tick().await;
                if !self.owns_loop(generation) {
                    info!("Stopping check loop.");
                    break;
                }
                tick += 1;
                match self
                    .run_tick()
                    .instrument(info_span!("schedule_tick", tick))
                    .await
                {
                    Ok(report) => debug!("Tick finished: {report:?}"),
                    Err(e) => error!("Subscription store unavailable, tick skipped: {e}"),
                }
            }
        });
    }

    /// Runs one tick. Only failing to read the batch is an error; every
    /// per-subscription failure is absorbed into the report.
    pub async fn run_tick(&self) -> Result<TickReport, DatabaseError> {
        let _tick = self.tick_lock.lock().await;
        let batch = self
            .repository
            .subscription
            .select_batch(self.config.batch_size)
            .await?;
        let mut report = TickReport {
            selected: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            debug!("No subscriptions due.");
            return Ok(report);
        }
        info!("Checking {} subscriptions.", batch.len());

        for (i, subscription) in batch.iter().enumerate() {
            if i > 0 {
                if !self.config.pause_between_checks.is_zero() {
                    sleep(self.config.pause_between_checks).await;
                }
                if self.stop_requested.load(Ordering::SeqCst) {
                    info!("Shutdown requested, leaving the rest of the batch.");
                    break;
                }
            }
            match self.check_subscription(subscription).await {
                Ok(result) => report.record(result),
                Err(e) => {
                    error!(
                        "Failed to record check for {}: {e}",
                        Self::describe(subscription)
                    );
                    report.store_errors += 1;
                }
            }
        }

        if report.launch_failures == report.selected {
            error!(
                "Browser could not be started for any of the {} checks this tick.",
                report.selected
            );
        }
        if report.store_errors == report.selected {
            error!(
                "Could not record any of the {} checks this tick.",
                report.selected
            );
        }
        Ok(report)
    }

    async fn check_subscription(
        &self,
        subscription: &SubscriptionModel,
    ) -> Result<CheckResult, DatabaseError> {
        let table = &self.repository.subscription;
        let address = subscription.address();

        let fragment = match self.source.fetch(&address).await {
            Ok(fragment) => fragment,
            Err(ScrapeError::PoolClosed) => {
                warn!(
                    "Fetch resource closed, skipping {}.",
                    Self::describe(subscription)
                );
                return Ok(CheckResult::Skipped);
            }
            Err(e) => {
                warn!("Check failed for {}: {e}", Self::describe(subscription));
                let error_count = table
                    .record_result(subscription.id, &CheckOutcome::Failure)
                    .await?;
                let quarantined = error_count == table.error_threshold();
                if quarantined {
                    warn!(
                        "{} quarantined after {error_count} consecutive failures.",
                        Self::describe(subscription)
                    );
                    if self.config.notify_on_quarantine {
                        self.notifier
                            .notify_quarantined(subscription.owner_id, &address, error_count)
                            .await;
                    }
                }
                return Ok(CheckResult::Failed {
                    quarantined,
                    launch_failure: matches!(e, ScrapeError::BrowserLaunch(_)),
                });
            }
        };

        let new_fingerprint = fingerprint(&fragment.html);
        if !has_changed(subscription.last_fingerprint.as_deref(), &new_fingerprint) {
            debug!("No change for {}.", Self::describe(subscription));
            table
                .record_result(subscription.id, &CheckOutcome::Success { fingerprint: None })
                .await?;
            return Ok(CheckResult::Unchanged);
        }

        info!(
            "Schedule changed for {}{}.",
            Self::describe(subscription),
            if fragment.is_no_schedule() {
                " (site reports no schedule)"
            } else {
                ""
            }
        );
        let delivered = self
            .notifier
            .notify(subscription.owner_id, &address, &fragment)
            .await;

        let stored = if delivered || self.config.notify_failure_policy == NotifyFailurePolicy::Advance
        {
            Some(new_fingerprint)
        } else {
            info!(
                "Keeping previous fingerprint for {} so the change is re-sent next check.",
                Self::describe(subscription)
            );
            None
        };
        table
            .record_result(subscription.id, &CheckOutcome::Success { fingerprint: stored })
            .await?;
        Ok(CheckResult::Changed { delivered })
    }

    fn describe(subscription: &SubscriptionModel) -> String {
        format!(
            "subscription `{}` ({})",
            subscription.id,
            subscription.address()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_outcomes() {
        let mut report = TickReport::default();
        report.record(CheckResult::Unchanged);
        report.record(CheckResult::Changed { delivered: true });
        report.record(CheckResult::Changed { delivered: false });
        report.record(CheckResult::Failed {
            quarantined: true,
            launch_failure: true,
        });
        report.record(CheckResult::Skipped);

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.changed, 2);
        assert_eq!(report.notified, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.launch_failures, 1);
    }
}
