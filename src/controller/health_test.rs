//! Tests for the layered health evaluator
//!
//! Probes and the exec channel are replaced by counting fakes so each test
//! can assert which layers actually ran.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};

use super::health::{
    status_failure, CheckLayer, ExecCheck, HealthCheckConfig, HealthEvaluator, NetworkProber,
    ProbeOutcome, Prober,
};
use super::store::{ExecChannel, ExecOutput};
use crate::error::{Error, Result};
use crate::unit::{ContainerState, ManagedUnit, UnitPhase};

#[derive(Default)]
struct CountingProber {
    http_fails: bool,
    tcp_fails: bool,
    http_calls: AtomicUsize,
    tcp_calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl Prober for CountingProber {
    async fn http_get(&self, url: &str) -> ProbeOutcome {
        self.http_calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if self.http_fails {
            ProbeOutcome::Fail("status 503".to_string())
        } else {
            ProbeOutcome::Pass
        }
    }

    async fn tcp_connect(&self, _address: &str, _port: u16) -> ProbeOutcome {
        self.tcp_calls.fetch_add(1, Ordering::SeqCst);
        if self.tcp_fails {
            ProbeOutcome::Fail("connection refused".to_string())
        } else {
            ProbeOutcome::Pass
        }
    }
}

enum ExecBehavior {
    Output { exit_code: i32, stdout: &'static str },
    StreamError,
    Hang,
}

struct FakeExec {
    behavior: ExecBehavior,
    calls: AtomicUsize,
    invocations: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeExec {
    fn new(behavior: ExecBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        })
    }

    fn output(exit_code: i32, stdout: &'static str) -> Arc<Self> {
        Self::new(ExecBehavior::Output { exit_code, stdout })
    }
}

#[async_trait]
impl ExecChannel for FakeExec {
    async fn exec(
        &self,
        _namespace: &str,
        _name: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations
            .lock()
            .unwrap()
            .push((container.to_string(), command.to_vec()));

        match &self.behavior {
            ExecBehavior::Output { exit_code, stdout } => Ok(ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: *exit_code,
            }),
            ExecBehavior::StreamError => Err(Error::ExecError("stream reset".to_string())),
            ExecBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ExecOutput::default())
            }
        }
    }
}

fn healthy_unit() -> ManagedUnit {
    ManagedUnit {
        namespace: "druid".to_string(),
        name: "router-0".to_string(),
        containers: vec!["router".to_string(), "sidecar".to_string()],
        phase: UnitPhase::Running,
        ready: true,
        address: Some("10.0.0.7".to_string()),
        container_states: vec![ContainerState {
            name: "router".to_string(),
            ready: true,
            waiting_reason: None,
        }],
        ..Default::default()
    }
}

fn exec_check(expected: &str) -> ExecCheck {
    ExecCheck {
        command: "ps aux | grep java".to_string(),
        container: String::new(),
        expected_output: expected.to_string(),
    }
}

fn all_layers() -> HealthCheckConfig {
    HealthCheckConfig::default()
        .with_http_path("/health")
        .with_tcp_port(9000)
        .with_exec(exec_check(""))
}

fn evaluator(
    config: HealthCheckConfig,
    prober: &Arc<CountingProber>,
    exec: Option<Arc<FakeExec>>,
) -> HealthEvaluator {
    let evaluator = HealthEvaluator::new(config)
        .unwrap()
        .with_prober(prober.clone());
    match exec {
        Some(exec) => evaluator.with_exec_channel(exec),
        None => evaluator,
    }
}

// =========================================================================
// Status layer
// =========================================================================

#[tokio::test]
async fn test_non_running_phase_is_unhealthy_without_optional_layers() {
    for phase in [
        UnitPhase::Pending,
        UnitPhase::Succeeded,
        UnitPhase::Failed,
        UnitPhase::Unknown,
    ] {
        let prober = Arc::new(CountingProber::default());
        let exec = FakeExec::output(0, "");
        let evaluator = evaluator(all_layers(), &prober, Some(exec.clone()));

        let unit = ManagedUnit {
            phase,
            ..healthy_unit()
        };
        let result = evaluator.evaluate(&unit).await.unwrap();

        assert!(!result.healthy, "phase {} should be unhealthy", phase);
        assert_eq!(result.failed_layer, Some(CheckLayer::Status));
        assert_eq!(prober.http_calls.load(Ordering::SeqCst), 0);
        assert_eq!(prober.tcp_calls.load(Ordering::SeqCst), 0);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_status_only_verdict_follows_status_layer() {
    let prober = Arc::new(CountingProber::default());
    let evaluator = evaluator(HealthCheckConfig::default(), &prober, None);

    let not_ready = ManagedUnit {
        ready: false,
        ..healthy_unit()
    };
    let container_not_ready = ManagedUnit {
        container_states: vec![ContainerState {
            name: "router".to_string(),
            ready: false,
            waiting_reason: None,
        }],
        ..healthy_unit()
    };
    let container_waiting = ManagedUnit {
        container_states: vec![ContainerState {
            name: "router".to_string(),
            ready: true,
            waiting_reason: Some("CrashLoopBackOff".to_string()),
        }],
        ..healthy_unit()
    };
    let no_address = ManagedUnit {
        address: None,
        ..healthy_unit()
    };

    for (unit, expected) in [
        (healthy_unit(), true),
        (no_address, true),
        (not_ready, false),
        (container_not_ready, false),
        (container_waiting, false),
    ] {
        let result = evaluator.evaluate(&unit).await.unwrap();
        assert_eq!(result.healthy, expected, "{:?}", unit);
        assert_eq!(result.healthy, status_failure(&unit).is_none());
    }

    assert_eq!(prober.http_calls.load(Ordering::SeqCst), 0);
    assert_eq!(prober.tcp_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_status_failure_reasons() {
    let waiting = ManagedUnit {
        container_states: vec![ContainerState {
            name: "router".to_string(),
            ready: true,
            waiting_reason: Some("ImagePullBackOff".to_string()),
        }],
        ..healthy_unit()
    };
    assert_eq!(
        status_failure(&waiting).as_deref(),
        Some("container router is waiting: ImagePullBackOff")
    );

    let pending = ManagedUnit {
        phase: UnitPhase::Pending,
        ..healthy_unit()
    };
    assert_eq!(status_failure(&pending).as_deref(), Some("pod phase is Pending"));
}

// =========================================================================
// Short-circuiting
// =========================================================================

#[tokio::test]
async fn test_all_layers_pass() {
    let prober = Arc::new(CountingProber::default());
    let exec = FakeExec::output(0, "");
    let evaluator = evaluator(all_layers(), &prober, Some(exec.clone()));

    let result = evaluator.evaluate(&healthy_unit()).await.unwrap();

    assert!(result.healthy);
    assert_eq!(result.failed_layer, None);
    assert_eq!(prober.http_calls.load(Ordering::SeqCst), 1);
    assert_eq!(prober.tcp_calls.load(Ordering::SeqCst), 1);
    assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        prober.urls.lock().unwrap().as_slice(),
        ["http://10.0.0.7:8080/health".to_string()]
    );
}

#[tokio::test]
async fn test_http_failure_skips_tcp_and_exec() {
    let prober = Arc::new(CountingProber {
        http_fails: true,
        ..Default::default()
    });
    let exec = FakeExec::output(0, "");
    let evaluator = evaluator(all_layers(), &prober, Some(exec.clone()));

    let result = evaluator.evaluate(&healthy_unit()).await.unwrap();

    assert!(!result.healthy);
    assert_eq!(result.failed_layer, Some(CheckLayer::Http));
    assert_eq!(prober.http_calls.load(Ordering::SeqCst), 1);
    assert_eq!(prober.tcp_calls.load(Ordering::SeqCst), 0);
    assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tcp_failure_skips_exec() {
    let prober = Arc::new(CountingProber {
        tcp_fails: true,
        ..Default::default()
    });
    let exec = FakeExec::output(0, "");
    let evaluator = evaluator(all_layers(), &prober, Some(exec.clone()));

    let result = evaluator.evaluate(&healthy_unit()).await.unwrap();

    assert_eq!(result.failed_layer, Some(CheckLayer::Tcp));
    assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
}

// =========================================================================
// Infrastructure errors
// =========================================================================

#[tokio::test]
async fn test_missing_address_is_an_error() {
    let unit = ManagedUnit {
        address: None,
        ..healthy_unit()
    };

    let prober = Arc::new(CountingProber::default());
    let http = evaluator(
        HealthCheckConfig::default().with_http_path("/health"),
        &prober,
        None,
    );
    assert!(matches!(
        http.evaluate(&unit).await,
        Err(Error::MissingAddress { .. })
    ));

    let tcp = evaluator(HealthCheckConfig::default().with_tcp_port(9000), &prober, None);
    assert!(matches!(
        tcp.evaluate(&unit).await,
        Err(Error::MissingAddress { .. })
    ));

    assert_eq!(prober.http_calls.load(Ordering::SeqCst), 0);
    assert_eq!(prober.tcp_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_exec_without_channel_is_an_error() {
    let prober = Arc::new(CountingProber::default());
    let evaluator = evaluator(
        HealthCheckConfig::default().with_exec(exec_check("")),
        &prober,
        None,
    );

    assert!(matches!(
        evaluator.evaluate(&healthy_unit()).await,
        Err(Error::ExecUnavailable)
    ));
}

#[tokio::test]
async fn test_exec_without_containers_is_an_error() {
    let prober = Arc::new(CountingProber::default());
    let exec = FakeExec::output(0, "");
    let evaluator = evaluator(
        HealthCheckConfig::default().with_exec(exec_check("")),
        &prober,
        Some(exec.clone()),
    );

    let unit = ManagedUnit {
        containers: vec![],
        ..healthy_unit()
    };
    assert!(matches!(
        evaluator.evaluate(&unit).await,
        Err(Error::NoContainers { .. })
    ));
    assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
}

// =========================================================================
// Exec layer
// =========================================================================

async fn exec_verdict(exec: Arc<FakeExec>, expected: &str) -> bool {
    let prober = Arc::new(CountingProber::default());
    let evaluator = evaluator(
        HealthCheckConfig::default().with_exec(exec_check(expected)),
        &prober,
        Some(exec),
    );
    evaluator.evaluate(&healthy_unit()).await.unwrap().healthy
}

#[tokio::test]
async fn test_exec_exit_codes_and_output() {
    assert!(!exec_verdict(FakeExec::output(2, ""), "").await);
    assert!(exec_verdict(FakeExec::output(0, ""), "").await);
    assert!(exec_verdict(FakeExec::output(0, "java"), "java").await);
    assert!(!exec_verdict(FakeExec::output(0, "python"), "java").await);
    assert!(exec_verdict(FakeExec::output(0, "root 1 java -jar router.jar\n"), "java").await);
    assert!(!exec_verdict(FakeExec::output(1, "java"), "java").await);
}

#[tokio::test]
async fn test_exec_stream_error_is_unhealthy() {
    assert!(!exec_verdict(FakeExec::new(ExecBehavior::StreamError), "").await);
}

#[tokio::test(start_paused = true)]
async fn test_exec_timeout_is_unhealthy() {
    let prober = Arc::new(CountingProber::default());
    let evaluator = evaluator(
        HealthCheckConfig::default()
            .with_exec(exec_check(""))
            .with_timeout(Duration::from_secs(2)),
        &prober,
        Some(FakeExec::new(ExecBehavior::Hang)),
    );

    let result = evaluator.evaluate(&healthy_unit()).await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.failed_layer, Some(CheckLayer::Exec));
}

#[tokio::test]
async fn test_exec_targets_container_and_wraps_command() {
    let prober = Arc::new(CountingProber::default());

    let exec = FakeExec::output(0, "");
    let default_target = evaluator(
        HealthCheckConfig::default().with_exec(exec_check("")),
        &prober,
        Some(exec.clone()),
    );
    default_target.evaluate(&healthy_unit()).await.unwrap();

    let exec_named = FakeExec::output(0, "");
    let named_target = evaluator(
        HealthCheckConfig::default().with_exec(ExecCheck {
            container: "sidecar".to_string(),
            ..exec_check("")
        }),
        &prober,
        Some(exec_named.clone()),
    );
    named_target.evaluate(&healthy_unit()).await.unwrap();

    let calls = exec.invocations.lock().unwrap();
    assert_eq!(calls[0].0, "router");
    assert_eq!(calls[0].1, vec!["sh", "-c", "ps aux | grep java"]);
    assert_eq!(exec_named.invocations.lock().unwrap()[0].0, "sidecar");
}

// =========================================================================
// Network prober
// =========================================================================

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_tcp_probe_against_loopback() {
    let prober = NetworkProber::new(Duration::from_secs(2)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    assert_eq!(prober.tcp_connect("127.0.0.1", open).await, ProbeOutcome::Pass);

    let closed = closed_port().await;
    assert!(matches!(
        prober.tcp_connect("127.0.0.1", closed).await,
        ProbeOutcome::Fail(_)
    ));
}

#[tokio::test]
async fn test_http_probe_status_ranges() {
    let app = Router::new()
        .route("/ok", get(|| async { StatusCode::OK }))
        .route("/moved", get(|| async { StatusCode::FOUND }))
        .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let prober = NetworkProber::new(Duration::from_secs(2)).unwrap();
    let url = |path: &str| format!("http://127.0.0.1:{}{}", port, path);

    assert_eq!(prober.http_get(&url("/ok")).await, ProbeOutcome::Pass);
    assert_eq!(prober.http_get(&url("/moved")).await, ProbeOutcome::Pass);
    assert!(matches!(
        prober.http_get(&url("/broken")).await,
        ProbeOutcome::Fail(_)
    ));
    assert!(matches!(
        prober.http_get(&url("/missing")).await,
        ProbeOutcome::Fail(_)
    ));

    let closed = closed_port().await;
    assert!(matches!(
        prober
            .http_get(&format!("http://127.0.0.1:{}/ok", closed))
            .await,
        ProbeOutcome::Fail(_)
    ));
}
