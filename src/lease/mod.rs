//! Orchestrates one lease over a batch of ephemeral instances.
//!
//! A lease creates the batch, waits for every instance to become active,
//! opens an ingress port, holds the instances for a fixed time, and then
//! deletes every instance it created. Once the provider has acknowledged
//! creation the only way out of [`LeaseController::run`] is through the
//! teardown pass, whether the wait timed out, a post action failed, the
//! cancellation token fired, or the provider panicked mid-lease.

mod tracked;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::poll::{PollOutcome, deadline_after, wait_until_active};
use crate::provider::{InstanceId, InstanceRecord, InstanceSpec, Provider};

pub use tracked::{InstanceFailure, TeardownSummary, TrackedInstances};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_HOLD: Duration = Duration::from_secs(3200);
const DEFAULT_INGRESS_PORT: u16 = 22;

/// Wait, hold, and post-action settings for a lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeaseTimings {
    /// Pause between readiness polls.
    pub poll_interval: Duration,
    /// How long to wait for the batch to become active.
    pub poll_timeout: Duration,
    /// How long to keep the instances once post actions are done.
    pub hold: Duration,
    /// Port opened on every instance; `None` skips the post action.
    pub ingress_port: Option<u16>,
}

impl Default for LeaseTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            hold: DEFAULT_HOLD,
            ingress_port: Some(DEFAULT_INGRESS_PORT),
        }
    }
}

/// States a lease moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeaseState {
    /// The provider acknowledged the batch.
    Created,
    /// Waiting for every instance to become active.
    Polling,
    /// Every instance was active in one listing.
    Ready,
    /// The readiness deadline passed.
    TimedOut,
    /// Opening the ingress port.
    PostActions,
    /// Keeping the instances alive.
    Holding,
    /// Deleting every tracked instance.
    TearingDown,
    /// The lease is over.
    Done,
}

/// Terminal outcome of a lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeaseOutcome {
    /// Every instance became active and the hold ran to completion.
    AllReady,
    /// The readiness wait timed out; the lease still held and tore down.
    TimedOut,
    /// The provider acknowledged the request but created nothing.
    NoneCreated,
    /// Cancellation cut the lease short and sent it to teardown.
    Interrupted,
}

impl fmt::Display for LeaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AllReady => "all instances ready",
            Self::TimedOut => "timed out waiting for instances",
            Self::NoneCreated => "no instances created",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Everything a caller needs to report on a finished lease.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LeaseReport {
    /// Identifier used to correlate log lines for this lease.
    pub run_id: Uuid,
    /// Terminal outcome.
    pub outcome: LeaseOutcome,
    /// Instances created for the lease, in creation order.
    pub instances: Vec<InstanceId>,
    /// States visited, in order.
    pub states: Vec<LeaseState>,
    /// Tracked instances as last seen by the readiness poll.
    pub last_seen: Vec<InstanceRecord>,
    /// Ingress requests that failed.
    pub ingress_failures: Vec<InstanceFailure>,
    /// Result of the delete pass.
    pub teardown: TeardownSummary,
}

/// Errors that abort a lease.
///
/// Only creation can fail a lease: afterwards every failure is logged,
/// recorded in the [`LeaseReport`], and followed by teardown.
#[derive(Debug, Error)]
pub enum LeaseError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when the create request fails; nothing exists to tear down.
    #[error("failed to create instances: {0}")]
    Create(#[source] ProviderError),
}

/// Mutable progress of a lease between creation and teardown.
struct Progress {
    states: Vec<LeaseState>,
    last_seen: Vec<InstanceRecord>,
    ingress_failures: Vec<InstanceFailure>,
}

impl Progress {
    fn enter(&mut self, state: LeaseState) {
        info!(state = ?state, "lease state");
        self.states.push(state);
    }
}

/// Runs leases against a provider.
#[derive(Debug)]
pub struct LeaseController<P> {
    provider: P,
}

impl<P> LeaseController<P>
where
    P: Provider + Sync,
{
    /// Creates a controller around `provider`.
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Returns the provider the controller drives.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs one lease for `spec`.
    ///
    /// Cancelling `cancel` during polling, post actions, or the hold sends
    /// the lease straight to teardown. Teardown itself is not cancellable.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Create`] when the create request fails. Every
    /// later failure is reported through [`LeaseReport`] instead.
    pub async fn run(
        &self,
        spec: &InstanceSpec,
        timings: &LeaseTimings,
        cancel: &CancellationToken,
    ) -> Result<LeaseReport, LeaseError<P::Error>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("lease", %run_id);
        self.run_lease(run_id, spec, timings, cancel)
            .instrument(span)
            .await
    }

    async fn run_lease(
        &self,
        run_id: Uuid,
        spec: &InstanceSpec,
        timings: &LeaseTimings,
        cancel: &CancellationToken,
    ) -> Result<LeaseReport, LeaseError<P::Error>> {
        info!(
            count = spec.count,
            name = %spec.name,
            image = %spec.image_name,
            flavor = %spec.flavor_name,
            "creating instances"
        );
        let created = self
            .provider
            .create_instances(spec)
            .await
            .map_err(LeaseError::Create)?;

        let mut progress = Progress {
            states: Vec::new(),
            last_seen: Vec::new(),
            ingress_failures: Vec::new(),
        };

        if created.is_empty() {
            warn!("provider acknowledged the request but created no instances");
            progress.enter(LeaseState::Done);
            return Ok(LeaseReport {
                run_id,
                outcome: LeaseOutcome::NoneCreated,
                instances: Vec::new(),
                states: progress.states,
                last_seen: Vec::new(),
                ingress_failures: Vec::new(),
                teardown: TeardownSummary::default(),
            });
        }

        let tracked = TrackedInstances::acquire(&created);
        info!(instances = ?tracked.ids(), "instances scheduled for creation");
        progress.enter(LeaseState::Created);

        let used = AssertUnwindSafe(self.use_instances(
            tracked.ids(),
            timings,
            cancel,
            &mut progress,
        ))
        .catch_unwind()
        .await;

        progress.enter(LeaseState::TearingDown);
        let instances = tracked.ids().to_vec();
        let teardown = tracked.release(&self.provider).await;
        if teardown.is_clean() {
            info!(deleted = teardown.deleted.len(), "teardown finished");
        } else {
            warn!(
                deleted = teardown.deleted.len(),
                failed = teardown.failed.len(),
                "teardown finished with failures"
            );
        }
        let outcome = match used {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!("lease panicked; instances were torn down before unwinding");
                panic::resume_unwind(payload);
            }
        };
        progress.enter(LeaseState::Done);

        Ok(LeaseReport {
            run_id,
            outcome,
            instances,
            states: progress.states,
            last_seen: progress.last_seen,
            ingress_failures: progress.ingress_failures,
            teardown,
        })
    }

    /// Polls, runs post actions, and holds. Never fails: every problem is
    /// logged or recorded so teardown always follows.
    async fn use_instances(
        &self,
        ids: &[InstanceId],
        timings: &LeaseTimings,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> LeaseOutcome {
        progress.enter(LeaseState::Polling);
        let deadline = deadline_after(timings.poll_timeout);
        let poll = wait_until_active(&self.provider, ids, timings.poll_interval, deadline, cancel)
            .await;
        progress.last_seen = poll.snapshot;

        let settled = match poll.outcome {
            PollOutcome::Ready => {
                progress.enter(LeaseState::Ready);
                LeaseOutcome::AllReady
            }
            PollOutcome::TimedOut => {
                progress.enter(LeaseState::TimedOut);
                warn!("continuing with instances that are not confirmed active");
                LeaseOutcome::TimedOut
            }
            PollOutcome::Interrupted => return LeaseOutcome::Interrupted,
        };

        progress.enter(LeaseState::PostActions);
        if let Some(port) = timings.ingress_port {
            let interrupted = self
                .open_ingress(ids, port, cancel, &mut progress.ingress_failures)
                .await;
            if interrupted {
                return LeaseOutcome::Interrupted;
            }
        }

        progress.enter(LeaseState::Holding);
        info!(hold_secs = timings.hold.as_secs(), "holding instances");
        tokio::select! {
            () = cancel.cancelled() => {
                info!("hold interrupted");
                LeaseOutcome::Interrupted
            }
            () = sleep(timings.hold) => settled,
        }
    }

    /// Opens `port` on every instance, returning `true` when cancelled.
    async fn open_ingress(
        &self,
        ids: &[InstanceId],
        port: u16,
        cancel: &CancellationToken,
        failures: &mut Vec<InstanceFailure>,
    ) -> bool {
        for id in ids {
            let result = tokio::select! {
                () = cancel.cancelled() => return true,
                result = self.provider.open_ingress_port(id, port) => result,
            };
            match result {
                Ok(()) => info!(instance_id = %id, port, "ingress port opened"),
                Err(err) => {
                    warn!(instance_id = %id, port, error = %err, "failed to open ingress port");
                    failures.push(InstanceFailure {
                        id: id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        false
    }
}
