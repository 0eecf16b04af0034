//! Object store collaborators
//!
//! The reconcile core talks to the cluster only through [`UnitStore`] and
//! [`ExecChannel`]. [`KubeStore`] implements both on top of a kube-rs
//! [`Client`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector as K8sLabelSelector;
use kube::{
    api::{Api, AttachParams, DeleteParams, Preconditions},
    core::Selector,
    Client,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::unit::ManagedUnit;

/// Outcome of a delete request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The pod was already gone
    AlreadyGone,
}

/// Captured result of a command run inside a container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Read/delete access to managed units and owner-group selectors
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Fetch a fresh snapshot; `Ok(None)` when the unit does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManagedUnit>>;

    /// Delete a unit, guarded by the UID of the snapshot it was judged on
    ///
    /// A unit that is gone, or was replaced under the same name, yields
    /// [`DeleteOutcome::AlreadyGone`].
    async fn delete(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<DeleteOutcome>;

    /// Resolve the member selector of a named owner group
    async fn group_selector(&self, namespace: &str, group: &str) -> Result<Selector>;
}

/// Remote command execution inside a unit's container
#[async_trait]
pub trait ExecChannel: Send + Sync {
    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}

/// [`UnitStore`] and [`ExecChannel`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl UnitStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ManagedUnit>> {
        let pod = self.pods(namespace).get_opt(name).await?;
        Ok(pod.as_ref().map(ManagedUnit::from))
    }

    async fn delete(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<DeleteOutcome> {
        let params = DeleteParams {
            preconditions: uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };

        let outcome = delete_outcome(self.pods(namespace).delete(name, &params).await)?;
        if outcome == DeleteOutcome::AlreadyGone {
            debug!("Pod {}/{} already deleted or replaced", namespace, name);
        }
        Ok(outcome)
    }

    async fn group_selector(&self, namespace: &str, group: &str) -> Result<Selector> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let statefulset = api.get(group).await?;

        member_selector(
            namespace,
            group,
            statefulset.spec.as_ref().map(|spec| &spec.selector),
        )
    }
}

#[async_trait]
impl ExecChannel for KubeStore {
    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods(namespace)
            .exec(name, command.to_vec(), &params)
            .await?;

        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let (stdout, stderr) = tokio::try_join!(
            read_stream(stdout_reader, "stdout"),
            read_stream(stderr_reader, "stderr"),
        )?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| Error::ExecError(e.to_string()))?;

        let exit_code = match status {
            Some(status) => exit_code_from_status(&status),
            None => return Err(Error::ExecError("exec stream closed without status".to_string())),
        };

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

async fn read_stream<R>(reader: Option<R>, which: &str) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    if let Some(mut reader) = reader {
        reader
            .read_to_end(&mut out)
            .await
            .map_err(|e| Error::ExecError(format!("reading {}: {}", which, e)))?;
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Map a delete response; 404 and UID precondition conflicts mean the judged pod is gone
fn delete_outcome<T>(result: std::result::Result<T, kube::Error>) -> Result<DeleteOutcome> {
    match result.map_err(Error::KubeError) {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.is_not_found() || e.is_conflict() => Ok(DeleteOutcome::AlreadyGone),
        Err(e) => Err(e),
    }
}

/// Convert an owner group's `spec.selector`; a missing selector fails the lookup
fn member_selector(
    namespace: &str,
    group: &str,
    selector: Option<&K8sLabelSelector>,
) -> Result<Selector> {
    let selector = selector.ok_or_else(|| Error::GroupSelectorUnavailable {
        namespace: namespace.to_string(),
        group: group.to_string(),
    })?;

    Selector::try_from(selector.clone()).map_err(|e| {
        Error::InvalidSelector(format!("StatefulSet {}/{}: {}", namespace, group, e))
    })
}

/// Map the exec subresource's final `Status` to a process exit code
fn exit_code_from_status(status: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Status) -> i32 {
    if status.status.as_deref() == Some("Success") {
        return 0;
    }

    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_deref())
                .and_then(|m| m.parse().ok())
        })
        .unwrap_or(1)
}
