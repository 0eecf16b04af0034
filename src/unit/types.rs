//! Shared types for managed unit snapshots

/// Observed pod lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Phase missing or not recognised
    #[default]
    Unknown,
}

impl UnitPhase {
    /// Parse the `status.phase` string reported by the API server
    pub fn from_phase_str(phase: &str) -> Self {
        match phase {
            "Pending" => UnitPhase::Pending,
            "Running" => UnitPhase::Running,
            "Succeeded" => UnitPhase::Succeeded,
            "Failed" => UnitPhase::Failed,
            _ => UnitPhase::Unknown,
        }
    }
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitPhase::Pending => write!(f, "Pending"),
            UnitPhase::Running => write!(f, "Running"),
            UnitPhase::Succeeded => write!(f, "Succeeded"),
            UnitPhase::Failed => write!(f, "Failed"),
            UnitPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Observed state of a single container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub ready: bool,
    /// Set when the container is in the `waiting` state (e.g. `CrashLoopBackOff`)
    pub waiting_reason: Option<String>,
}
