//! Shared fixtures and helpers for lease BDD scenarios.

use std::time::Duration;

use rstest::fixture;
use vmlease::test_support::ScriptedProvider;
use vmlease::{InstanceSpec, LeaseReport, LeaseTimings};

#[derive(Clone, Debug)]
pub struct LeaseContext {
    pub provider: ScriptedProvider,
    pub requested: u32,
    pub interrupt_after: Option<Duration>,
    pub report: Option<LeaseReport>,
    pub elapsed: Option<Duration>,
}

#[fixture]
pub fn lease_context() -> LeaseContext {
    LeaseContext {
        provider: ScriptedProvider::new(),
        requested: 1,
        interrupt_after: None,
        report: None,
        elapsed: None,
    }
}

/// Splits a comma separated id list, ignoring blanks.
pub fn split_ids(ids: &str) -> Vec<&str> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}

pub fn lease_spec(count: u32) -> InstanceSpec {
    InstanceSpec::builder()
        .count(count.max(1))
        .name("bdd-lease")
        .image_name("Ubuntu Server 22.04 LTS")
        .flavor_name("n3-RTX-A4000x1")
        .key_name("bdd-key")
        .environment_name("default-CANADA-1")
        .build()
        .unwrap_or_else(|err| panic!("lease spec should be valid: {err}"))
}

pub const fn lease_timings() -> LeaseTimings {
    LeaseTimings {
        poll_interval: Duration::from_secs(30),
        poll_timeout: Duration::from_secs(600),
        hold: Duration::from_secs(3200),
        ingress_port: Some(22),
    }
}
