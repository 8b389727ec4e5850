//! Per-role machine index allocation.
//!
//! Each ContaboMachine gets a stable index within its cluster and role,
//! which ends up in the instance display name (`control-plane-0`,
//! `md-0-3`). Reconciles for sibling machines run concurrently, so
//! allocation is serialised through a lock shared by every reconcile
//! worker and the chosen index is persisted before the lock is released.

use crate::error::ControllerError;
use crate::kube_client::KubeClient;
use crds::ContaboMachine;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct IndexAllocator {
    lock: Arc<Mutex<()>>,
}

/// Lowest non-negative integer not in `used`
pub fn lowest_free_index(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 0;
    for &i in used {
        if i != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

impl IndexAllocator {
    pub fn new(lock: Arc<Mutex<()>>) -> Self {
        Self { lock }
    }

    /// Assign and persist `spec.index` for `machine`
    ///
    /// No-op when the machine already has an index. On success the working
    /// copy carries the persisted index and resourceVersion; on failure it is
    /// left without an index.
    pub async fn assign_index(
        &self,
        kube: &dyn KubeClient,
        machine: &mut ContaboMachine,
    ) -> Result<u32, ControllerError> {
        if let Some(index) = machine.spec.index {
            return Ok(index);
        }

        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        let cluster = machine.cluster_name()?;
        let role = machine.role();

        let _guard = self.lock.lock().await;

        // Another worker may have assigned it while we waited for the lock.
        let mut current = kube
            .get_contabo_machine(&namespace, &name)
            .await?
            .ok_or_else(|| {
                ControllerError::Reconciliation(format!(
                    "ContaboMachine {}/{} disappeared",
                    namespace, name
                ))
            })?;
        if let Some(index) = current.spec.index {
            *machine = current;
            return Ok(index);
        }

        let used: BTreeSet<u32> = kube
            .list_contabo_machines(&namespace, &cluster)
            .await?
            .iter()
            .filter(|m| m.name_any() != name && m.role() == role)
            .filter_map(|m| m.spec.index)
            .collect();
        let index = lowest_free_index(&used);
        debug!("{}/{}: indices in use for role {}: {:?}", namespace, name, role, used);

        current.spec.index = Some(index);
        match kube.replace_contabo_machine(&current).await {
            Ok(updated) => {
                info!(
                    "Assigned index {} to ContaboMachine {}/{} (role {})",
                    index, namespace, name, role
                );
                *machine = updated;
                Ok(index)
            }
            Err(e) => {
                warn!(
                    "Failed to persist index {} for ContaboMachine {}/{}: {}",
                    index, namespace, name, e
                );
                machine.spec.index = None;
                Err(e)
            }
        }
    }
}
