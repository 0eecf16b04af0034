//! Health evaluation for managed pods
//!
//! Checks run as ordered layers and the first failing layer decides the
//! verdict; later layers are never invoked:
//!
//! 1. **Status** (always): phase `Running`, `Ready` condition true, every
//!    container ready and none waiting
//! 2. **HTTP** (optional): `GET http://<pod-ip>:8080<path>` answers 2xx/3xx
//! 3. **TCP** (optional): `<pod-ip>:<port>` accepts a connection
//! 4. **Exec** (optional): `sh -c <command>` exits 0 inside the container and
//!    its stdout contains the expected output, if one is configured
//!
//! # Verdicts vs errors
//!
//! An unreachable endpoint, refused port or failing command is a normal
//! unhealthy verdict. [`HealthEvaluator::evaluate`] only returns `Err` when a
//! verdict cannot be reached at all: the pod has no IP for an address-bound
//! layer, or the exec layer has no channel to run through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::store::ExecChannel;
use crate::error::{Error, Result};
use crate::unit::{ManagedUnit, UnitPhase};

/// Port the HTTP layer targets on the pod IP
pub const HTTP_CHECK_PORT: u16 = 8080;

/// Timeout applied to every network-bound layer unless configured otherwise
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exec layer settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecCheck {
    /// Shell command, run as `sh -c <command>`
    pub command: String,
    /// Target container; empty selects the first declared container
    pub container: String,
    /// Expected stdout; empty checks the exit code only
    pub expected_output: String,
}

/// Immutable health check configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub http_path: Option<String>,
    pub tcp_port: Option<u16>,
    pub exec: Option<ExecCheck>,
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            http_path: None,
            tcp_port: None,
            exec: None,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl HealthCheckConfig {
    pub fn with_http_path(mut self, path: impl Into<String>) -> Self {
        self.http_path = Some(path.into());
        self
    }

    /// Port 0 disables the TCP layer
    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = (port != 0).then_some(port);
        self
    }

    pub fn with_exec(mut self, exec: ExecCheck) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A single check layer, in evaluation order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckLayer {
    Status,
    Http,
    Tcp,
    Exec,
}

impl CheckLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckLayer::Status => "status",
            CheckLayer::Http => "http",
            CheckLayer::Tcp => "tcp",
            CheckLayer::Exec => "exec",
        }
    }
}

impl std::fmt::Display for CheckLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of a health evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    /// Whether every configured layer passed
    pub healthy: bool,

    /// Layer that failed, if any
    pub failed_layer: Option<CheckLayer>,

    /// Human-readable message
    pub message: String,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            failed_layer: None,
            message: "Pod is healthy".to_string(),
        }
    }

    /// Create an unhealthy result attributed to `layer`
    pub fn unhealthy(layer: CheckLayer, message: String) -> Self {
        Self {
            healthy: false,
            failed_layer: Some(layer),
            message,
        }
    }
}

/// Outcome of a single network probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pass,
    Fail(String),
}

/// Network probes used by the HTTP and TCP layers
///
/// Implementations bound every call by their own timeout.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn http_get(&self, url: &str) -> ProbeOutcome;

    async fn tcp_connect(&self, address: &str, port: u16) -> ProbeOutcome;
}

/// [`Prober`] doing real HTTP requests and TCP dials
pub struct NetworkProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetworkProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        // 3xx counts as healthy, so redirects are reported rather than followed
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(concat!("pod-restarter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn http_get(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    ProbeOutcome::Pass
                } else {
                    ProbeOutcome::Fail(format!("{} returned status {}", url, status))
                }
            }
            Err(e) => ProbeOutcome::Fail(format!("cannot reach {}: {}", url, e)),
        }
    }

    async fn tcp_connect(&self, address: &str, port: u16) -> ProbeOutcome {
        match tokio::time::timeout(self.timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => ProbeOutcome::Pass,
            Ok(Err(e)) => ProbeOutcome::Fail(format!("connect to {}:{} failed: {}", address, port, e)),
            Err(_) => ProbeOutcome::Fail(format!(
                "connect to {}:{} timed out after {:?}",
                address, port, self.timeout
            )),
        }
    }
}

/// Runs the layered checks against a pod snapshot
///
/// Holds no per-call state, so one instance serves every reconcile.
pub struct HealthEvaluator {
    config: HealthCheckConfig,
    prober: Arc<dyn Prober>,
    exec: Option<Arc<dyn ExecChannel>>,
}

impl HealthEvaluator {
    /// Create an evaluator using real network probes and no exec channel
    pub fn new(config: HealthCheckConfig) -> Result<Self> {
        let prober = Arc::new(NetworkProber::new(config.timeout)?);
        Ok(Self {
            config,
            prober,
            exec: None,
        })
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_exec_channel(mut self, exec: Arc<dyn ExecChannel>) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Evaluate a pod, stopping at the first failing layer
    pub async fn evaluate(&self, unit: &ManagedUnit) -> Result<HealthCheckResult> {
        if let Some(reason) = status_failure(unit) {
            debug!("Pod {}/{} failed status check: {}", unit.namespace, unit.name, reason);
            return Ok(HealthCheckResult::unhealthy(CheckLayer::Status, reason));
        }

        if let Some(path) = &self.config.http_path {
            let address = require_address(unit)?;
            let url = format!("http://{}:{}{}", host(address), HTTP_CHECK_PORT, path);
            debug!("Querying health endpoint {}", url);

            if let ProbeOutcome::Fail(reason) = self.prober.http_get(&url).await {
                return Ok(HealthCheckResult::unhealthy(CheckLayer::Http, reason));
            }
        }

        if let Some(port) = self.config.tcp_port {
            let address = require_address(unit)?;
            debug!("Checking TCP port {}:{}", address, port);

            if let ProbeOutcome::Fail(reason) = self.prober.tcp_connect(address, port).await {
                return Ok(HealthCheckResult::unhealthy(CheckLayer::Tcp, reason));
            }
        }

        if let Some(exec) = &self.config.exec {
            if let Some(reason) = self.exec_failure(unit, exec).await? {
                return Ok(HealthCheckResult::unhealthy(CheckLayer::Exec, reason));
            }
        }

        Ok(HealthCheckResult::healthy())
    }

    /// Runs the exec layer; `Ok(Some(reason))` means unhealthy
    async fn exec_failure(&self, unit: &ManagedUnit, check: &ExecCheck) -> Result<Option<String>> {
        let channel = self.exec.as_ref().ok_or(Error::ExecUnavailable)?;
        let container = unit
            .exec_target(&check.container)
            .ok_or_else(|| Error::NoContainers {
                namespace: unit.namespace.clone(),
                name: unit.name.clone(),
            })?;

        let command = vec!["sh".to_string(), "-c".to_string(), check.command.clone()];
        debug!(
            "Running exec check in {}/{} container {}: {}",
            unit.namespace, unit.name, container, check.command
        );

        let output = match tokio::time::timeout(
            self.config.timeout,
            channel.exec(&unit.namespace, &unit.name, container, &command),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(Some(format!("exec failed: {}", e))),
            Err(_) => {
                return Ok(Some(format!(
                    "exec timed out after {:?}",
                    self.config.timeout
                )))
            }
        };

        if output.exit_code != 0 {
            info!(
                "Exec check in {}/{} exited with code {}: {}",
                unit.namespace,
                unit.name,
                output.exit_code,
                output.stderr.trim()
            );
            return Ok(Some(format!("command exited with code {}", output.exit_code)));
        }

        if !check.expected_output.is_empty() && !output.stdout.contains(&check.expected_output) {
            return Ok(Some(format!(
                "output does not contain expected {:?}",
                check.expected_output
            )));
        }

        Ok(None)
    }
}

/// Status layer: returns the reason when the pod is not healthy
pub fn status_failure(unit: &ManagedUnit) -> Option<String> {
    if unit.phase != UnitPhase::Running {
        return Some(format!("pod phase is {}", unit.phase));
    }

    if !unit.ready {
        return Some("pod Ready condition is not True".to_string());
    }

    for container in &unit.container_states {
        if !container.ready {
            return Some(format!("container {} is not ready", container.name));
        }
        if let Some(reason) = &container.waiting_reason {
            return Some(format!("container {} is waiting: {}", container.name, reason));
        }
    }

    None
}

fn require_address(unit: &ManagedUnit) -> Result<&str> {
    unit.address().ok_or_else(|| Error::MissingAddress {
        namespace: unit.namespace.clone(),
        name: unit.name.clone(),
    })
}

/// IPv6 literals need brackets inside a URL authority
fn host(address: &str) -> String {
    if address.contains(':') {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}
