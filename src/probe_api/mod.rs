//! Liveness, readiness and metrics endpoints
//!
//! Served on `--health-probe-bind-address` for the kubelet and Prometheus.

mod server;

pub use server::{router, run_probe_server, serve, Readiness};
