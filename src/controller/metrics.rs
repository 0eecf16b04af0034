//! Prometheus metrics for the pod restarter

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for the reconcile outcome counter
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Labels for the recycle counter
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RecycleLabels {
    pub namespace: String,
    pub layer: String,
}

/// Reconciles completed, by outcome
pub static RECONCILES: Lazy<Family<OutcomeLabels, Counter>> = Lazy::new(Family::default);

/// Pods deleted for failing a health check, by failing layer
pub static RECYCLES: Lazy<Family<RecycleLabels, Counter>> = Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "pod_restarter_reconciles",
        "Reconciles completed by the pod restarter, by outcome",
        RECONCILES.clone(),
    );
    registry.register(
        "pod_restarter_recycles",
        "Pods deleted after failing a health check",
        RECYCLES.clone(),
    );
    registry
});

/// Count a finished reconcile
pub fn record_outcome(outcome: &str) {
    RECONCILES
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .inc();
}

/// Count a recycled pod
pub fn record_recycle(namespace: &str, layer: &str) {
    RECYCLES
        .get_or_create(&RecycleLabels {
            namespace: namespace.to_string(),
            layer: layer.to_string(),
        })
        .inc();
}

/// Render the registry in the OpenMetrics text format
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        record_outcome("recycled");
        record_recycle("druid", "tcp");

        let text = encode().unwrap();
        assert!(text.contains("pod_restarter_reconciles_total{outcome=\"recycled\"}"));
        assert!(text.contains("pod_restarter_recycles_total{namespace=\"druid\",layer=\"tcp\"}"));
    }
}
