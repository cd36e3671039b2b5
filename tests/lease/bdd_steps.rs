//! BDD step definitions for lease behaviour.

use std::collections::BTreeMap;
use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Builder;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use vmlease::test_support::ScriptedProvider;
use vmlease::{InstanceStatus, LeaseController};

use super::test_helpers::{LeaseContext, lease_spec, lease_timings, split_ids};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("the provider will create instances \"{ids}\"")]
fn provider_creates(mut lease_context: LeaseContext, ids: String) -> LeaseContext {
    let created = split_ids(&ids);
    lease_context.requested = u32::try_from(created.len()).unwrap_or(u32::MAX);
    lease_context.provider = ScriptedProvider::with_created(&created);
    lease_context
}

#[given("instances \"{ids}\" become active on poll {poll:u32}")]
fn active_on_poll(lease_context: LeaseContext, ids: String, poll: u32) -> LeaseContext {
    let ids = split_ids(&ids);
    let pending = ids
        .iter()
        .map(|id| (*id, InstanceStatus::Pending))
        .collect::<Vec<_>>();
    let active = ids
        .iter()
        .map(|id| (*id, InstanceStatus::Active))
        .collect::<Vec<_>>();
    for _ in 1..poll {
        lease_context.provider.push_listing(&pending);
    }
    lease_context.provider.push_listing(&active);
    lease_context
}

#[given("instances \"{ids}\" never become active")]
fn never_active(lease_context: LeaseContext, ids: String) -> LeaseContext {
    let pending = split_ids(&ids)
        .into_iter()
        .map(|id| (id, InstanceStatus::Pending))
        .collect::<Vec<_>>();
    lease_context.provider.push_listing(&pending);
    lease_context
}

#[given("deleting instance \"{id}\" fails")]
fn delete_fails(lease_context: LeaseContext, id: String) -> LeaseContext {
    lease_context.provider.fail_delete_for(id.trim());
    lease_context
}

#[given("the lease is interrupted after {secs:u32} seconds")]
fn interrupted_after(mut lease_context: LeaseContext, secs: u32) -> LeaseContext {
    lease_context.interrupt_after = Some(Duration::from_secs(u64::from(secs)));
    lease_context
}

#[when("I run the lease")]
fn run_lease(mut lease_context: LeaseContext) -> Result<LeaseContext, StepError> {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let provider = lease_context.provider.clone();
    let interrupt_after = lease_context.interrupt_after;
    let count = lease_context.requested;

    let (result, elapsed) = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        if let Some(delay) = interrupt_after {
            let trigger = cancel.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                trigger.cancel();
            });
        }
        let start = Instant::now();
        let controller = LeaseController::new(provider);
        let result = controller
            .run(&lease_spec(count), &lease_timings(), &cancel)
            .await;
        (result, start.elapsed())
    });

    let report = result.map_err(|err| StepError::Assertion(err.to_string()))?;
    lease_context.report = Some(report);
    lease_context.elapsed = Some(elapsed);
    Ok(lease_context)
}

#[then("the lease outcome is \"{outcome}\"")]
fn outcome_is(lease_context: &LeaseContext, outcome: String) -> Result<(), StepError> {
    let Some(report) = lease_context.report.as_ref() else {
        return Err(StepError::Assertion(String::from("missing report")));
    };
    let actual = format!("{:?}", report.outcome);
    if actual == outcome.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected outcome {outcome}, got {actual}"
        )))
    }
}

#[then("instances \"{ids}\" were each deleted once")]
fn deleted_once(lease_context: &LeaseContext, ids: String) -> Result<(), StepError> {
    let mut counts = BTreeMap::new();
    for id in lease_context.provider.deleted_ids() {
        *counts.entry(id).or_insert(0_usize) += 1;
    }
    let expected = split_ids(&ids)
        .into_iter()
        .map(|id| (id.to_owned(), 1_usize))
        .collect::<BTreeMap<_, _>>();
    if counts == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one delete each for {expected:?}, got {counts:?}"
        )))
    }
}

#[then("no instance was deleted")]
fn nothing_deleted(lease_context: &LeaseContext) -> Result<(), StepError> {
    let deleted = lease_context.provider.deleted_ids();
    if deleted.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no deletes, got {deleted:?}"
        )))
    }
}

#[then("the lease took {secs:u32} seconds")]
fn lease_took(lease_context: &LeaseContext, secs: u32) -> Result<(), StepError> {
    let expected = Duration::from_secs(u64::from(secs));
    match lease_context.elapsed {
        Some(elapsed) if elapsed == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the lease to take {expected:?}, took {other:?}"
        ))),
    }
}

#[then("the teardown reports \"{id}\" as leaked")]
fn reports_leak(lease_context: &LeaseContext, id: String) -> Result<(), StepError> {
    let Some(report) = lease_context.report.as_ref() else {
        return Err(StepError::Assertion(String::from("missing report")));
    };
    let leaked = report
        .teardown
        .failed
        .iter()
        .map(|failure| failure.id.as_str())
        .collect::<Vec<_>>();
    if leaked == [id.trim()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} to be reported as leaked, got {leaked:?}"
        )))
    }
}
