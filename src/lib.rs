//! pod-restarter: recycles unhealthy StatefulSet pods
//!
//! Watches pods in one namespace, selects them by owning StatefulSet and/or
//! label selector, runs a layered health check (status, HTTP, TCP, exec) and
//! deletes the pods that fail so their controller recreates them.

pub mod config;
pub mod controller;
pub mod error;
pub mod probe_api;
pub mod unit;

pub use error::{Error, Result};
