//! Scoped ownership of the instances created for one lease.

use std::collections::{HashSet, VecDeque};

use tracing::{error, info, warn};

use crate::provider::{InstanceId, InstanceRecord, Provider};

/// Per-instance failure recorded while the lease keeps going.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceFailure {
    /// Instance the request was about.
    pub id: InstanceId,
    /// Rendered provider error.
    pub message: String,
}

/// Outcome of the delete pass over every tracked instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    /// Instances whose delete request was accepted.
    pub deleted: Vec<InstanceId>,
    /// Instances whose delete request failed; these may still exist.
    pub failed: Vec<InstanceFailure>,
}

impl TeardownSummary {
    /// Returns `true` when every delete request was accepted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The instance ids a lease is responsible for deleting.
///
/// Acquired the moment the provider acknowledges creation and consumed by
/// [`TrackedInstances::release`]. Ids that were never handed to the provider
/// for deletion are logged at error level when the guard is dropped.
#[derive(Debug)]
pub struct TrackedInstances {
    ids: Vec<InstanceId>,
    pending: VecDeque<InstanceId>,
}

impl TrackedInstances {
    /// Takes ownership of the created instances, dropping duplicate ids.
    #[must_use]
    pub fn acquire(records: &[InstanceRecord]) -> Self {
        let mut seen = HashSet::new();
        let ids = records
            .iter()
            .filter(|record| seen.insert(record.id.clone()))
            .map(|record| record.id.clone())
            .collect::<Vec<_>>();
        Self {
            pending: ids.iter().cloned().collect(),
            ids,
        }
    }

    /// Returns the tracked ids in creation order.
    #[must_use]
    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    /// Issues exactly one delete request per tracked id.
    ///
    /// A failed delete is logged and recorded; it never stops the pass.
    pub async fn release<P: Provider>(mut self, provider: &P) -> TeardownSummary {
        let mut summary = TeardownSummary::default();
        while let Some(id) = self.pending.front().cloned() {
            info!(instance_id = %id, "deleting instance");
            match provider.delete_instance(&id).await {
                Ok(()) => {
                    info!(instance_id = %id, "instance deleted");
                    summary.deleted.push(id);
                }
                Err(err) => {
                    warn!(instance_id = %id, error = %err, "failed to delete instance");
                    summary.failed.push(InstanceFailure {
                        id,
                        message: err.to_string(),
                    });
                }
            }
            self.pending.pop_front();
        }
        summary
    }
}

impl Drop for TrackedInstances {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let leaked = self
            .pending
            .iter()
            .map(InstanceId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        error!(instances = %leaked, "lease ended without deleting its instances");
    }
}
