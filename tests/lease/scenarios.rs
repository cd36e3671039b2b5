//! BDD scenarios for the lease lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LeaseContext, lease_context};

#[scenario(
    path = "tests/features/lease.feature",
    name = "Interrupt a three instance lease during the hold"
)]
fn scenario_interrupt_during_hold(lease_context: LeaseContext) {
    let _ = lease_context;
}

#[scenario(
    path = "tests/features/lease.feature",
    name = "Tear down after a readiness timeout"
)]
fn scenario_teardown_after_timeout(lease_context: LeaseContext) {
    let _ = lease_context;
}

#[scenario(
    path = "tests/features/lease.feature",
    name = "Keep deleting when one delete fails"
)]
fn scenario_delete_failure_isolated(lease_context: LeaseContext) {
    let _ = lease_context;
}

#[scenario(
    path = "tests/features/lease.feature",
    name = "Skip the lease when nothing is created"
)]
fn scenario_nothing_created(lease_context: LeaseContext) {
    let _ = lease_context;
}
