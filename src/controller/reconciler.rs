//! Pod reconciliation
//!
//! Every change notification for a pod runs one fetch -> filter -> evaluate
//! -> act cycle. Unhealthy pods are deleted so their StatefulSet recreates
//! them. Errors never leave the reconcile: they turn into a requeue after
//! [`RETRY_DELAY`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::filter::FilterMatcher;
use super::health::HealthEvaluator;
use super::metrics;
use super::store::{DeleteOutcome, UnitStore};
use crate::error::{Error, Result};

/// Delay before a failed reconcile is retried
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Stage at which a reconcile failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Evaluate,
    Delete,
}

/// Result of one reconcile call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do: pod gone, out of scope, healthy, or already deleted
    NoAction,
    /// Unhealthy pod deleted
    Recycled,
    /// Retry after [`RETRY_DELAY`]
    Error(ErrorKind),
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::NoAction => "no_action",
            ReconcileOutcome::Recycled => "recycled",
            ReconcileOutcome::Error(ErrorKind::Fetch) => "fetch_error",
            ReconcileOutcome::Error(ErrorKind::Evaluate) => "evaluate_error",
            ReconcileOutcome::Error(ErrorKind::Delete) => "delete_error",
        }
    }

    /// Controller action for this outcome
    pub fn action(&self) -> Action {
        match self {
            ReconcileOutcome::Error(_) => Action::requeue(RETRY_DELAY),
            _ => Action::await_change(),
        }
    }
}

/// Fetch, filter, evaluate and recycle a single pod
pub struct PodReconciler {
    store: Arc<dyn UnitStore>,
    matcher: FilterMatcher,
    evaluator: HealthEvaluator,
}

impl PodReconciler {
    pub fn new(store: Arc<dyn UnitStore>, matcher: FilterMatcher, evaluator: HealthEvaluator) -> Self {
        Self {
            store,
            matcher,
            evaluator,
        }
    }

    pub fn matcher(&self) -> &FilterMatcher {
        &self.matcher
    }

    /// Run one reconcile for `namespace/name`
    pub async fn reconcile_unit(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        let outcome = self.reconcile_inner(namespace, name).await;
        metrics::record_outcome(outcome.as_str());
        outcome
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        let unit = match self.store.get(namespace, name).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                debug!("Pod {}/{} no longer exists", namespace, name);
                return ReconcileOutcome::NoAction;
            }
            Err(e) => {
                warn!("Failed to get pod {}/{}: {}", namespace, name, e);
                return ReconcileOutcome::Error(ErrorKind::Fetch);
            }
        };

        if !self.matcher.matches(&unit).await {
            debug!("Pod {}/{} does not match filter criteria, skipping", namespace, name);
            return ReconcileOutcome::NoAction;
        }

        debug!("Reconciling pod {}/{} (phase: {})", namespace, name, unit.phase);

        let health = match self.evaluator.evaluate(&unit).await {
            Ok(health) => health,
            Err(e) => {
                warn!("Failed to check health of pod {}/{}: {}", namespace, name, e);
                return ReconcileOutcome::Error(ErrorKind::Evaluate);
            }
        };

        if health.healthy {
            debug!("Pod {}/{} is healthy", namespace, name);
            return ReconcileOutcome::NoAction;
        }

        let layer = health
            .failed_layer
            .map(|l| l.as_str())
            .unwrap_or("unknown");
        info!(
            "Pod {}/{} is unhealthy ({} check: {}), triggering restart",
            namespace, name, layer, health.message
        );

        match self.store.delete(namespace, name, unit.uid.as_deref()).await {
            Ok(DeleteOutcome::Deleted) => {
                info!("Successfully triggered restart of pod {}/{}", namespace, name);
                metrics::record_recycle(namespace, layer);
                ReconcileOutcome::Recycled
            }
            Ok(DeleteOutcome::AlreadyGone) => {
                debug!("Pod {}/{} was already deleted or replaced", namespace, name);
                ReconcileOutcome::NoAction
            }
            Err(e) => {
                error!("Failed to delete pod {}/{}: {}", namespace, name, e);
                ReconcileOutcome::Error(ErrorKind::Delete)
            }
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub namespace: String,
    pub reconciler: PodReconciler,
    /// Set once the watch is running; backs the readiness probe
    pub ready: AtomicBool,
}

impl ControllerState {
    pub fn new(client: Client, namespace: String, reconciler: PodReconciler) -> Self {
        Self {
            client,
            namespace,
            reconciler,
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Main entry point to start the controller
///
/// Pods are watched in the target namespace, server-side filtered by the
/// label selector when one is configured, and reconciled one at a time.
/// Returns after a shutdown signal once the in-flight reconcile finishes.
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(state.client.clone(), &state.namespace);

    let mut watch_config = watcher::Config::default();
    if let Some(selector) = state.reconciler.matcher().config().label_selector() {
        watch_config = watch_config.labels(&selector.to_string());
    }

    info!("Starting pod restarter controller in namespace {}", state.namespace);

    // Fail fast on missing RBAC before the watch starts retrying silently
    pods.list(&kube::api::ListParams::default().limit(1))
        .await
        .map_err(|e| {
            error!("Cannot list pods in namespace {}: {:?}", state.namespace, e);
            Error::KubeError(e)
        })?;

    state.ready.store(true, Ordering::Relaxed);

    Controller::new(pods, watch_config)
        .with_config(controller::Config::default().concurrency(1))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled pod {}", obj.name),
                Err(e) => warn!("Reconcile stream error: {}", e),
            }
        })
        .await;

    state.ready.store(false, Ordering::Relaxed);
    info!("Controller stopped");

    Ok(())
}

/// Reconcile entrypoint invoked by the kube-rs controller
#[instrument(skip(pod, ctx), fields(name = %pod.name_any(), namespace = pod.namespace()))]
async fn reconcile(pod: Arc<Pod>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = pod.namespace().unwrap_or_else(|| ctx.namespace.clone());
    let outcome = ctx
        .reconciler
        .reconcile_unit(&namespace, &pod.name_any())
        .await;
    Ok(outcome.action())
}

/// Error policy determines how to handle reconciliation errors
///
/// `reconcile` resolves every failure into an action itself, so this only
/// guards the contract required by the runtime.
fn error_policy(pod: Arc<Pod>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", pod.name_any(), error);
    error_action(error)
}

/// Infrastructure errors retry after [`RETRY_DELAY`]; configuration errors wait for a change
pub(crate) fn error_action(error: &Error) -> Action {
    if error.is_retriable() {
        Action::requeue(RETRY_DELAY)
    } else {
        Action::await_change()
    }
}
