//! Controller module for pod health reconciliation
//!
//! This module contains the watch loop, the per-pod reconcile state machine,
//! and the filter and health check layers it drives.

pub mod filter;
pub mod health;
#[cfg(test)]
mod health_test;
pub mod metrics;
mod reconciler;
pub mod selector;
pub mod store;

pub use filter::{FilterConfig, FilterMatcher};
pub use health::{
    CheckLayer, ExecCheck, HealthCheckConfig, HealthCheckResult, HealthEvaluator, NetworkProber,
    ProbeOutcome, Prober, DEFAULT_CHECK_TIMEOUT,
};
pub use reconciler::{
    run_controller, ControllerState, ErrorKind, PodReconciler, ReconcileOutcome, RETRY_DELAY,
};
pub use selector::LabelSelector;
pub use store::{DeleteOutcome, ExecChannel, ExecOutput, KubeStore, UnitStore};
