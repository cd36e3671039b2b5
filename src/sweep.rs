//! Recovery sweep for instances a lease never tore down.
//!
//! A lease that is killed outright (for example with `SIGKILL`) cannot run
//! its teardown. The sweep finds the leftovers by name or by explicit id,
//! deletes them, and fails if any of them are still listed once the settle
//! window has passed.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::lease::InstanceFailure;
use crate::poll::deadline_after;
use crate::provider::{InstanceId, InstanceRecord, Provider};

/// Default time allowed for deletions to disappear from listings.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default pause between verification listings.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(10);

/// Which instances a sweep is responsible for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SweepTarget {
    /// Every instance whose display name matches exactly.
    Name(String),
    /// Exactly these instance ids.
    Ids(Vec<InstanceId>),
}

impl SweepTarget {
    fn matches(&self, record: &InstanceRecord) -> bool {
        match self {
            Self::Name(name) => record.name == *name,
            Self::Ids(ids) => ids.contains(&record.id),
        }
    }
}

/// Configuration for one sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepConfig {
    /// Instances to remove.
    pub target: SweepTarget,
    /// Report matches without deleting anything.
    pub dry_run: bool,
    /// How long to wait for deleted instances to leave the listing.
    pub settle_timeout: Duration,
    /// Pause between verification listings.
    pub settle_interval: Duration,
}

impl SweepConfig {
    /// Builds a config targeting `target` with default settle timings.
    ///
    /// # Errors
    ///
    /// Returns [`SweepConfigError::InvalidConfig`] when the name is blank or
    /// the id list is empty.
    pub fn new(target: SweepTarget) -> Result<Self, SweepConfigError> {
        let normalised = match target {
            SweepTarget::Name(name) => {
                let trimmed = name.trim().to_owned();
                if trimmed.is_empty() {
                    return Err(SweepConfigError::InvalidConfig {
                        field: String::from("name"),
                    });
                }
                SweepTarget::Name(trimmed)
            }
            SweepTarget::Ids(ids) => {
                if ids.is_empty() {
                    return Err(SweepConfigError::InvalidConfig {
                        field: String::from("ids"),
                    });
                }
                SweepTarget::Ids(ids)
            }
        };
        Ok(Self {
            target: normalised,
            dry_run: false,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        })
    }

    /// Switches dry-run reporting on or off.
    #[must_use]
    pub const fn dry_run(mut self, value: bool) -> Self {
        self.dry_run = value;
        self
    }

    /// Overrides the settle timings.
    #[must_use]
    pub const fn settle(mut self, timeout: Duration, interval: Duration) -> Self {
        self.settle_timeout = timeout;
        self.settle_interval = interval;
        self
    }
}

/// Summary of sweep work.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Instances that matched the target.
    pub matched: Vec<InstanceId>,
    /// Instances whose delete request was accepted.
    pub deleted: Vec<InstanceId>,
    /// Delete requests that failed but whose instance is gone anyway.
    pub failed: Vec<InstanceFailure>,
}

/// Errors raised while building a [`SweepConfig`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SweepConfigError {
    /// Raised when the sweep target is unusable.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
}

/// Errors returned by the sweep.
#[derive(Debug, Error)]
pub enum SweepError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when the provider cannot list instances.
    #[error("failed to list instances: {0}")]
    List(#[source] ProviderError),
    /// Raised when matching instances remain after the sweep.
    #[error("instances remain after sweep: {}", format_ids(.remaining))]
    NotClean {
        /// Instances still listed once the settle window passed.
        remaining: Vec<InstanceId>,
        /// Delete requests that failed.
        failed: Vec<InstanceFailure>,
    },
}

fn format_ids(ids: &[InstanceId]) -> String {
    ids.iter()
        .map(InstanceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Deletes leftover instances through a [`Provider`].
#[derive(Clone, Debug)]
pub struct Sweeper<P> {
    config: SweepConfig,
    provider: P,
}

impl<P> Sweeper<P>
where
    P: Provider + Sync,
{
    /// Creates a sweeper for `config` backed by `provider`.
    #[must_use]
    pub const fn new(config: SweepConfig, provider: P) -> Self {
        Self { config, provider }
    }

    /// Performs the sweep.
    ///
    /// Every matching instance gets one delete request; a failed delete is
    /// logged and the sweep carries on. The sweep then re-lists until no
    /// match remains or the settle window closes.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::List`] when listing fails and
    /// [`SweepError::NotClean`] when matches outlive the settle window.
    pub async fn sweep(&self) -> Result<SweepSummary, SweepError<P::Error>> {
        let matched = self.matching().await?;
        let mut summary = SweepSummary {
            matched: matched.clone(),
            ..SweepSummary::default()
        };
        if matched.is_empty() {
            info!("no matching instances to sweep");
            return Ok(summary);
        }
        if self.config.dry_run {
            for id in &matched {
                info!(instance_id = %id, "dry run: would delete instance");
            }
            return Ok(summary);
        }

        for id in &matched {
            match self.provider.delete_instance(id).await {
                Ok(()) => {
                    info!(instance_id = %id, "instance deleted");
                    summary.deleted.push(id.clone());
                }
                Err(err) => {
                    warn!(instance_id = %id, error = %err, "failed to delete instance");
                    summary.failed.push(InstanceFailure {
                        id: id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let remaining = self.settle(&matched).await?;
        if remaining.is_empty() {
            return Ok(summary);
        }
        Err(SweepError::NotClean {
            remaining,
            failed: summary.failed,
        })
    }

    async fn matching(&self) -> Result<Vec<InstanceId>, SweepError<P::Error>> {
        let listing = self
            .provider
            .list_instances()
            .await
            .map_err(SweepError::List)?;
        let mut seen = HashSet::new();
        Ok(listing
            .into_iter()
            .filter(|record| self.config.target.matches(record))
            .map(|record| record.id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn settle(&self, swept: &[InstanceId]) -> Result<Vec<InstanceId>, SweepError<P::Error>> {
        let deadline = deadline_after(self.config.settle_timeout);
        loop {
            let remaining = self
                .matching()
                .await?
                .into_iter()
                .filter(|id| swept.contains(id))
                .collect::<Vec<_>>();
            let now = Instant::now();
            if remaining.is_empty() || now >= deadline {
                return Ok(remaining);
            }
            info!(remaining = remaining.len(), "waiting for deletions to settle");
            sleep(self.config.settle_interval.min(deadline.duration_since(now))).await;
        }
    }
}
