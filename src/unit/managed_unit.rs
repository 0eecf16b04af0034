//! Decoding of pods into [`ManagedUnit`] snapshots

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use super::types::{ContainerState, UnitPhase};

/// Snapshot of one monitored pod
///
/// Built fresh for every reconcile and dropped when it returns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedUnit {
    pub namespace: String,
    pub name: String,
    /// Server-assigned UID; differs for a pod recreated under the same name
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Declared container names in spec order
    pub containers: Vec<String>,
    pub phase: UnitPhase,
    /// True only when the `Ready` condition is present with status `True`
    pub ready: bool,
    /// Pod IP, if one has been assigned
    pub address: Option<String>,
    pub container_states: Vec<ContainerState>,
}

impl ManagedUnit {
    /// Container targeted by exec checks: the named one, or the first declared
    pub fn exec_target<'a>(&'a self, container: &'a str) -> Option<&'a str> {
        if container.is_empty() {
            self.containers.first().map(String::as_str)
        } else {
            Some(container)
        }
    }

    /// Assigned address, treating an empty string as unassigned
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().filter(|a| !a.is_empty())
    }
}

impl From<&Pod> for ManagedUnit {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();

        let phase = status
            .and_then(|s| s.phase.as_deref())
            .map(UnitPhase::from_phase_str)
            .unwrap_or_default();

        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false);

        let container_states = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| ContainerState {
                        name: cs.name.clone(),
                        ready: cs.ready,
                        waiting_reason: cs
                            .state
                            .as_ref()
                            .and_then(|st| st.waiting.as_ref())
                            .map(|w| w.reason.clone().unwrap_or_else(|| "Waiting".to_string())),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        Self {
            namespace: pod.namespace().unwrap_or_else(|| "default".to_string()),
            name: pod.name_any(),
            uid: pod.uid(),
            labels: pod.labels().clone(),
            containers,
            phase,
            ready,
            address: status.and_then(|s| s.pod_ip.clone()),
            container_states,
        }
    }
}
