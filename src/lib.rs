//! Core library for the `vmlease` ephemeral instance controller.
//!
//! The crate exposes a provider abstraction for short-lived compute
//! instances, a Hyperstack implementation of it, and a lease controller that
//! drives one batch through create, wait for readiness, open a port, hold,
//! and teardown. Teardown always runs once the provider has acknowledged
//! creation, including after timeouts, provider errors, and interrupts.

pub mod cloud_init;
pub mod config;
pub mod hyperstack;
pub mod lease;
pub mod poll;
pub mod provider;
pub mod sweep;
pub mod test_support;

pub use config::{ConfigError, LeaseConfig};
pub use hyperstack::{HyperstackError, HyperstackProvider};
pub use lease::{
    InstanceFailure, LeaseController, LeaseError, LeaseOutcome, LeaseReport, LeaseState,
    LeaseTimings, TeardownSummary, TrackedInstances,
};
pub use poll::{PollOutcome, PollReport, wait_until_active};
pub use provider::{
    InstanceId, InstanceRecord, InstanceSpec, InstanceSpecBuilder, InstanceStatus, Provider,
    ProviderFuture, SpecError,
};
pub use sweep::{SweepConfig, SweepConfigError, SweepError, SweepSummary, SweepTarget, Sweeper};
