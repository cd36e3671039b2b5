//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::provider::{
    InstanceId, InstanceRecord, InstanceSpec, InstanceStatus, Provider, ProviderFuture,
};

/// A provider request recorded by [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `create_instances` was called for `count` instances.
    Create {
        /// Requested instance count.
        count: u32,
    },
    /// `list_instances` was called.
    List,
    /// `open_ingress_port` was called.
    OpenIngress {
        /// Target instance.
        id: InstanceId,
        /// Requested port.
        port: u16,
    },
    /// `delete_instance` was called.
    Delete {
        /// Target instance.
        id: InstanceId,
    },
}

/// Errors produced by [`ScriptedProvider`] on scripted failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedProviderError {
    /// Scripted creation failure.
    #[error("create failure")]
    Create,
    /// Scripted listing failure.
    #[error("list failure")]
    List,
    /// Scripted ingress failure for one instance.
    #[error("ingress failure for {0}")]
    Ingress(InstanceId),
    /// Scripted deletion failure for one instance.
    #[error("delete failure for {0}")]
    Delete(InstanceId),
}

#[derive(Debug, Default)]
struct State {
    created: Vec<InstanceRecord>,
    fail_create: bool,
    listings: VecDeque<Result<Vec<InstanceRecord>, ScriptedProviderError>>,
    panic_on_list: bool,
    fail_ingress: HashSet<InstanceId>,
    ingress_delay: Option<Duration>,
    fail_delete: HashSet<InstanceId>,
    calls: Vec<ProviderCall>,
}

/// Scripted provider double that records every request.
///
/// Listings are served in FIFO order; the final queued listing keeps being
/// served once the queue drains, so timeout scenarios need only script the
/// steady state. With nothing queued, listings are empty.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<State>>,
}

impl ScriptedProvider {
    /// Creates a provider that acknowledges creation with no instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider whose create call returns pending instances with
    /// the given ids.
    #[must_use]
    pub fn with_created(ids: &[&str]) -> Self {
        let provider = Self::new();
        provider.lock().created = ids
            .iter()
            .map(|id| record(id, InstanceStatus::Pending))
            .collect();
        provider
    }

    fn lock(&self) -> StdMutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("scripted provider lock poisoned: {err}"))
    }

    /// Makes the create call fail.
    pub fn fail_create(&self) {
        self.lock().fail_create = true;
    }

    /// Queues a listing with the given instance statuses.
    pub fn push_listing(&self, instances: &[(&str, InstanceStatus)]) {
        let records = instances
            .iter()
            .map(|(id, status)| record(id, *status))
            .collect();
        self.lock().listings.push_back(Ok(records));
    }

    /// Queues a failed listing.
    pub fn push_list_failure(&self) {
        self.lock()
            .listings
            .push_back(Err(ScriptedProviderError::List));
    }

    /// Makes every later `list_instances` call panic.
    pub fn panic_on_list(&self) {
        self.lock().panic_on_list = true;
    }

    /// Makes each `open_ingress_port` call take `delay` before answering.
    pub fn delay_ingress(&self, delay: Duration) {
        self.lock().ingress_delay = Some(delay);
    }

    /// Makes `open_ingress_port` fail for `id`.
    pub fn fail_ingress_for(&self, id: &str) {
        self.lock().fail_ingress.insert(InstanceId::from(id));
    }

    /// Makes `delete_instance` fail for `id`.
    pub fn fail_delete_for(&self, id: &str) {
        self.lock().fail_delete.insert(InstanceId::from(id));
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Returns the ids passed to `delete_instance`, in call order.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Delete { id } => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Returns the ids passed to `open_ingress_port`, in call order.
    #[must_use]
    pub fn ingress_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::OpenIngress { id, .. } => Some(id.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Returns how many listings were requested.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| **call == ProviderCall::List)
            .count()
    }
}

/// Builds a record with a name derived from the id.
#[must_use]
pub fn record(id: &str, status: InstanceStatus) -> InstanceRecord {
    InstanceRecord {
        id: InstanceId::from(id),
        name: format!("vm-{id}"),
        status,
        public_ip: None,
    }
}

impl Provider for ScriptedProvider {
    type Error = ScriptedProviderError;

    fn create_instances<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::Create { count: spec.count });
            if state.fail_create {
                return Err(ScriptedProviderError::Create);
            }
            Ok(state.created.clone())
        })
    }

    fn list_instances(&self) -> ProviderFuture<'_, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::List);
            if state.panic_on_list {
                drop(state);
                panic!("scripted listing panic");
            }
            if state.listings.len() > 1 {
                return state.listings.pop_front().unwrap_or_else(|| Ok(Vec::new()));
            }
            state
                .listings
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn open_ingress_port<'a>(
        &'a self,
        id: &'a InstanceId,
        port: u16,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let (delay, fails) = {
                let mut state = self.lock();
                state.calls.push(ProviderCall::OpenIngress {
                    id: id.clone(),
                    port,
                });
                (state.ingress_delay, state.fail_ingress.contains(id))
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fails {
                return Err(ScriptedProviderError::Ingress(id.clone()));
            }
            Ok(())
        })
    }

    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::Delete { id: id.clone() });
            if state.fail_delete.contains(id) {
                return Err(ScriptedProviderError::Delete(id.clone()));
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or removes (`None`) environment variables while holding
    /// a global mutex.
    pub async fn apply(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let wrapped = pairs
            .iter()
            .map(|(key, value)| (*key, Some(*value)))
            .collect::<Vec<_>>();
        Self::apply(&wrapped).await
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
