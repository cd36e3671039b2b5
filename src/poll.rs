//! Readiness polling for a batch of instances.
//!
//! Readiness is judged on a single listing: every tracked instance must be
//! `ACTIVE` in the same snapshot. Instances that are active in different
//! snapshots never add up to a ready batch.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{InstanceId, InstanceRecord, InstanceStatus, Provider};

/// How a poll loop ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// Every tracked instance was active in one listing.
    Ready,
    /// The deadline passed before the batch became ready.
    TimedOut,
    /// The cancellation token fired while waiting.
    Interrupted,
}

/// Result of a poll loop together with what it last observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollReport {
    /// Terminal outcome of the loop.
    pub outcome: PollOutcome,
    /// Number of listings attempted, including failed ones.
    pub attempts: u32,
    /// Tracked instances from the most recent successful listing.
    pub snapshot: Vec<InstanceRecord>,
}

/// Stand-in for an unreachable deadline (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns the instant `timeout` from now.
///
/// A timeout too large to represent saturates to a far-future instant
/// instead of overflowing.
#[must_use]
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Polls `provider` until every id in `ids` is active in one listing, the
/// `deadline` passes, or `cancel` fires.
///
/// The first listing is issued immediately. Between listings the loop sleeps
/// for `interval`, shortened so that the last listing lands on the deadline.
/// Listing failures are logged and count as a not-ready poll. Ids missing
/// from a listing are not ready.
pub async fn wait_until_active<P: Provider>(
    provider: &P,
    ids: &[InstanceId],
    interval: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> PollReport {
    let tracked = ids.iter().collect::<HashSet<_>>();
    let mut attempts = 0_u32;
    let mut snapshot = Vec::new();

    let outcome = loop {
        if cancel.is_cancelled() {
            break PollOutcome::Interrupted;
        }

        attempts = attempts.saturating_add(1);
        let listing = tokio::select! {
            () = cancel.cancelled() => break PollOutcome::Interrupted,
            listing = provider.list_instances() => listing,
        };

        match listing {
            Ok(all) => {
                snapshot = all
                    .into_iter()
                    .filter(|record| tracked.contains(&record.id))
                    .collect();
                log_snapshot(ids, &snapshot);
                if all_active(ids, &snapshot) {
                    break PollOutcome::Ready;
                }
            }
            Err(err) => {
                warn!(attempt = attempts, error = %err, "failed to list instances; treating poll as not ready");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break PollOutcome::TimedOut;
        }
        let pause = interval.min(deadline.duration_since(now));
        debug!(attempt = attempts, pause_secs = pause.as_secs(), "instances not ready yet");

        tokio::select! {
            () = cancel.cancelled() => break PollOutcome::Interrupted,
            () = sleep(pause) => {}
        }
    };

    match outcome {
        PollOutcome::Ready => info!(attempts, "all instances are active"),
        PollOutcome::TimedOut => warn!(attempts, "timed out waiting for instances to become active"),
        PollOutcome::Interrupted => info!(attempts, "readiness polling interrupted"),
    }

    PollReport {
        outcome,
        attempts,
        snapshot,
    }
}

fn all_active(ids: &[InstanceId], snapshot: &[InstanceRecord]) -> bool {
    ids.iter().all(|id| {
        snapshot
            .iter()
            .any(|record| record.id == *id && record.status == InstanceStatus::Active)
    })
}

fn log_snapshot(ids: &[InstanceId], snapshot: &[InstanceRecord]) {
    for record in snapshot {
        info!(
            instance_id = %record.id,
            name = %record.name,
            status = %record.status,
            public_ip = record.public_ip.as_deref().unwrap_or("not assigned"),
            "instance status"
        );
        if record.status == InstanceStatus::Error {
            warn!(instance_id = %record.id, "provider reports instance in ERROR");
        }
    }
    for id in ids {
        if !snapshot.iter().any(|record| record.id == *id) {
            debug!(instance_id = %id, "instance not present in listing yet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InstanceStatus::{Active, Error, Pending};
    use crate::test_support::{ProviderCall, ScriptedProvider};

    const INTERVAL: Duration = Duration::from_secs(30);
    const TIMEOUT: Duration = Duration::from_secs(600);

    fn ids(values: &[&str]) -> Vec<InstanceId> {
        values.iter().copied().map(InstanceId::from).collect()
    }

    async fn poll(provider: &ScriptedProvider, tracked: &[InstanceId]) -> PollReport {
        let deadline = Instant::now() + TIMEOUT;
        wait_until_active(provider, tracked, INTERVAL, deadline, &CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_happens_immediately() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Active)]);
        let start = Instant::now();

        let report = poll(&provider, &ids(&["a"])).await;

        assert_eq!(report.outcome, PollOutcome::Ready);
        assert_eq!(report.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_once_all_active_in_one_snapshot() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Pending), ("b", Pending), ("c", Pending)]);
        provider.push_listing(&[("a", Active), ("b", Pending), ("c", Active)]);
        provider.push_listing(&[("a", Active), ("b", Active), ("c", Active), ("z", Pending)]);
        let start = Instant::now();

        let report = poll(&provider, &ids(&["a", "b", "c"])).await;

        assert_eq!(report.outcome, PollOutcome::Ready);
        assert_eq!(report.attempts, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(report.snapshot.len(), 3, "untracked instances are filtered");
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_is_never_assembled_across_snapshots() {
        let provider = ScriptedProvider::new();
        for _ in 0..10 {
            provider.push_listing(&[("a", Active), ("b", Pending)]);
            provider.push_listing(&[("a", Pending), ("b", Active)]);
        }
        let start = Instant::now();

        let report = poll(&provider, &ids(&["a", "b"])).await;

        assert_eq!(report.outcome, PollOutcome::TimedOut);
        assert_eq!(start.elapsed(), TIMEOUT);
        assert_eq!(report.attempts, 21, "one poll at t=0 plus one per interval");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_instances_are_not_ready() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Active)]);
        provider.push_listing(&[("a", Active), ("b", Active)]);

        let report = poll(&provider, &ids(&["a", "b"])).await;

        assert_eq!(report.outcome, PollOutcome::Ready);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listing_failures_are_retried_on_the_next_interval() {
        let provider = ScriptedProvider::new();
        provider.push_list_failure();
        provider.push_listing(&[("a", Active)]);

        let report = poll(&provider, &ids(&["a"])).await;

        assert_eq!(report.outcome, PollOutcome::Ready);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errored_instances_keep_the_loop_waiting() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Error)]);
        let start = Instant::now();

        let report = poll(&provider, &ids(&["a"])).await;

        assert_eq!(report.outcome, PollOutcome::TimedOut);
        assert_eq!(start.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn last_sleep_is_clamped_to_the_deadline() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Pending)]);
        let start = Instant::now();
        let deadline = start + Duration::from_secs(45);

        let report = wait_until_active(
            &provider,
            &ids(&["a"]),
            INTERVAL,
            deadline,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.outcome, PollOutcome::TimedOut);
        assert_eq!(report.attempts, 3, "polls at 0s, 30s, and 45s");
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wakes_the_poll_sleep() {
        let provider = ScriptedProvider::new();
        provider.push_listing(&[("a", Pending)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(40)).await;
            trigger.cancel();
        });
        let start = Instant::now();

        let report = wait_until_active(
            &provider,
            &ids(&["a"]),
            INTERVAL,
            start + TIMEOUT,
            &cancel,
        )
        .await;

        assert_eq!(report.outcome, PollOutcome::Interrupted);
        assert_eq!(start.elapsed(), Duration::from_secs(40));
        let listings = provider
            .calls()
            .into_iter()
            .filter(|call| *call == ProviderCall::List)
            .count();
        assert_eq!(listings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_token_skips_polling() {
        let provider = ScriptedProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = wait_until_active(
            &provider,
            &ids(&["a"]),
            INTERVAL,
            Instant::now() + TIMEOUT,
            &cancel,
        )
        .await;

        assert_eq!(report.outcome, PollOutcome::Interrupted);
        assert_eq!(report.attempts, 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_saturates_the_deadline() {
        let now = Instant::now();
        let deadline = deadline_after(Duration::MAX);

        assert!(deadline > now + TIMEOUT);
        assert_eq!(deadline_after(TIMEOUT), now + TIMEOUT);
    }
}
