//! Managed unit model
//!
//! A [`ManagedUnit`] is a read-only snapshot of one monitored pod, decoded
//! once at the store boundary so the health and filter logic never touch
//! raw Kubernetes objects.

mod managed_unit;
mod types;

pub use managed_unit::ManagedUnit;
pub use types::{ContainerState, UnitPhase};
