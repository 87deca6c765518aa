#![forbid(unsafe_code)]

use crate::config::SweepConfig;
use crate::discovery::{discover, resolve_subscription, ResourceGroupFilter, ServerFilter};
use crate::error::{Error, Result};
use crate::lro;
use crate::preflight;
use crate::rest::client::ManagementCaller;
use crate::target::{FailoverTarget, TargetStatus};
use crate::telemetry::runtime_counters;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Terminal tallies of one sweep. `succeeded + skipped + failed` always
/// equals the discovered target count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl SweepSummary {
    fn from_targets(targets: &[FailoverTarget], elapsed: Duration) -> Self {
        let mut summary = Self {
            succeeded: 0,
            skipped: 0,
            failed: 0,
            elapsed,
        };
        for target in targets {
            match target.status() {
                TargetStatus::Succeeded => summary.succeeded += 1,
                TargetStatus::Skipped => summary.skipped += 1,
                TargetStatus::Failed => summary.failed += 1,
                TargetStatus::Pending | TargetStatus::InProgress => {}
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failover sweep finished: {} succeeded, {} skipped, {} failed across {} target(s) in {}",
            self.succeeded,
            self.skipped,
            self.failed,
            self.total(),
            humantime::format_duration(Duration::from_secs(self.elapsed.as_secs()))
        )
    }
}

/// The reconcile loop: discover the target set, initiate everything pending,
/// then poll in-flight operations on a fixed cadence until every target is
/// terminal.
pub struct SweepEngine {
    caller: Arc<dyn ManagementCaller>,
    config: SweepConfig,
}

impl SweepEngine {
    pub fn new(caller: Arc<dyn ManagementCaller>, config: SweepConfig) -> Self {
        Self { caller, config }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<SweepSummary> {
        let started = Instant::now();
        let subscription = resolve_subscription(
            self.caller.as_ref(),
            self.config.subscription_id.as_deref(),
        )
        .await?;
        let group_filter = ResourceGroupFilter::parse(self.config.resource_group.as_deref());
        let server_filter = ServerFilter::parse(self.config.servers.as_deref());

        if self.config.check_maintenance_notification {
            match preflight::active_notification(self.caller.as_ref(), &subscription).await? {
                Some(tracking_id) => {
                    tracing::info!(
                        target: "sqlsweep::engine",
                        event = "maintenance_window_open",
                        subscription = %subscription,
                        tracking_id = %tracking_id
                    );
                }
                None => {
                    return Err(Error::Preflight {
                        subscription: subscription.clone(),
                    })
                }
            }
        }

        let mut targets = discover(
            self.caller.as_ref(),
            &subscription,
            &group_filter,
            &server_filter,
        )
        .await?;

        if targets.is_empty() {
            return Err(Error::discovery(format!(
                "no failover targets found for subscription `{subscription}`, \
                 resource group filter `{group_filter}`, server filter `{server_filter}`"
            )));
        }

        tracing::info!(
            target: "sqlsweep::engine",
            event = "sweep_started",
            subscription = %subscription,
            targets = targets.len(),
            poll_interval_secs = self.config.poll_interval().as_secs()
        );

        while targets.iter().any(|t| !t.status().is_terminal()) {
            if shutdown.is_cancelled() {
                return Err(self.cancel(&mut targets));
            }

            for target in targets.iter_mut() {
                if shutdown.is_cancelled() {
                    break;
                }
                if target.status() == TargetStatus::Pending {
                    lro::initiate(self.caller.as_ref(), target).await;
                }
            }

            let in_progress = targets
                .iter()
                .filter(|t| t.status() == TargetStatus::InProgress)
                .count();
            if in_progress == 0 {
                continue;
            }

            // Status endpoints are only queried after the management plane
            // has had one poll interval to observe fresh initiations.
            if sleep_until_cancelled(self.config.poll_interval(), &shutdown).await {
                return Err(self.cancel(&mut targets));
            }

            runtime_counters().inc_poll_sweeps();
            tracing::debug!(
                target: "sqlsweep::engine",
                event = "poll_sweep",
                in_progress = in_progress
            );
            for target in targets.iter_mut() {
                if shutdown.is_cancelled() {
                    break;
                }
                if target.status() == TargetStatus::InProgress {
                    lro::poll(self.caller.as_ref(), target).await;
                }
            }
        }

        let summary = SweepSummary::from_targets(&targets, started.elapsed());
        tracing::info!(
            target: "sqlsweep::engine",
            event = "sweep_completed",
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs()
        );
        if summary.failed > 0 {
            tracing::warn!(
                target: "sqlsweep::engine",
                event = "sweep_had_failures",
                failed = summary.failed,
                advice = "re-run the sweep with the same filters, or escalate with the per-target errors above"
            );
        }

        Ok(summary)
    }

    /// Applies the cancellation contract: nothing new is issued, and every
    /// target that has not reached a terminal state is failed with a
    /// cancellation message.
    fn cancel(&self, targets: &mut [FailoverTarget]) -> Error {
        let mut unfinished = 0;
        for target in targets.iter_mut() {
            if !target.status().is_terminal() {
                unfinished += 1;
                runtime_counters().inc_targets_failed();
                target.mark_failed("cancelled before completion");
            }
        }
        let summary = SweepSummary::from_targets(targets, Duration::ZERO);
        tracing::warn!(
            target: "sqlsweep::engine",
            event = "sweep_cancelled",
            unfinished = unfinished,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed
        );
        Error::Cancelled { unfinished }
    }
}

/// Sleeps for the poll interval unless the shutdown token fires first.
/// Returns `true` when shutdown interrupted the wait.
async fn sleep_until_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}
