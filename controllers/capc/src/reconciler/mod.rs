//! Reconciliation logic for ContaboCluster and ContaboMachine.
//!
//! - `cluster`: private network, SSH key, control-plane endpoint, teardown
//! - `machine`: prerequisites, status dispatch and readiness of one machine
//! - `machine_instance`: binding a machine to an instance (adopt, reuse, create)
//! - `machine_bootstrap`: private network attachment, SSH check, addresses
//! - `machine_recovery`: failed instances and vanished instances
//! - `machine_delete`: returning the instance to the pool
//!
//! Every handler works on a working copy of the object and its status;
//! the status is written once at the end of a pass, or earlier when a
//! value must be durable before the next side effect.

pub mod cluster;
pub mod machine;
mod machine_bootstrap;
mod machine_delete;
mod machine_instance;
mod machine_recovery;

#[cfg(test)]
mod machine_test;

use crate::backoff::FibonacciBackoff;
use crate::index_allocator::IndexAllocator;
use crate::kube_client::KubeClient;
use crate::ssh::GuestShell;
use contabo_client::ContaboClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Error backoff bounds in seconds
const ERROR_BACKOFF_MIN: u64 = 5;
const ERROR_BACKOFF_MAX: u64 = 300;

/// Reconciles Contabo infrastructure for Cluster API objects.
pub struct Reconciler {
    pub(crate) contabo: Arc<dyn ContaboClientTrait>,
    pub(crate) kube: Arc<dyn KubeClient>,
    pub(crate) shell: Arc<dyn GuestShell>,
    pub(crate) allocator: IndexAllocator,
    /// Error backoff per object (namespace/name)
    backoff_states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        contabo: Arc<dyn ContaboClientTrait>,
        kube: Arc<dyn KubeClient>,
        shell: Arc<dyn GuestShell>,
        allocator: IndexAllocator,
    ) -> Self {
        Self {
            contabo,
            kube,
            shell,
            allocator,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Next retry delay for an object whose reconcile returned an error
    pub fn next_error_backoff(&self, resource_key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .entry(resource_key.to_string())
                .or_insert_with(|| FibonacciBackoff::new(ERROR_BACKOFF_MIN, ERROR_BACKOFF_MAX))
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Forget the error streak of an object after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}
