//! pod-restarter entrypoint

use std::process;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pod_restarter::config::RestarterConfig;
use pod_restarter::controller::{
    run_controller, ControllerState, FilterMatcher, HealthEvaluator, KubeStore, PodReconciler,
};
use pod_restarter::error::Result;
use pod_restarter::probe_api;

#[tokio::main]
async fn main() {
    let config = RestarterConfig::parse();

    if let Err(e) = run(config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: RestarterConfig) -> Result<()> {
    let (filter, health) = config.validate()?;
    let probe_address = config.probe_address()?;

    init_logging(config.log_json);

    info!(
        namespace = %config.namespace,
        statefulset = ?filter.owner_group(),
        selector = ?filter.label_selector().map(|s| s.to_string()),
        "Starting pod-restarter"
    );
    info!(
        http_path = ?health.http_path,
        tcp_port = ?health.tcp_port,
        exec = health.exec.is_some(),
        timeout = ?health.timeout,
        "Health checks configured"
    );

    let client = Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));

    let mut evaluator = HealthEvaluator::new(health)?;
    if evaluator.config().exec.is_some() {
        evaluator = evaluator.with_exec_channel(store.clone());
    }

    let matcher = FilterMatcher::new(filter, store.clone());
    let reconciler = PodReconciler::new(store, matcher, evaluator);
    let state = Arc::new(ControllerState::new(
        client,
        config.namespace.clone(),
        reconciler,
    ));

    let (stop_probes, probes_stopped) = oneshot::channel::<()>();
    let probe_server = probe_address.map(|addr| {
        let state = state.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = probes_stopped.await;
            };
            if let Err(e) = probe_api::run_probe_server(addr, state, shutdown).await {
                error!("Probe server failed: {}", e);
            }
        })
    });

    let result = run_controller(state).await;

    let _ = stop_probes.send(());
    if let Some(handle) = probe_server {
        let _ = handle.await;
    }

    info!("pod-restarter stopped");
    result
}
