//! Command-line and environment configuration
//!
//! Every flag can also be set through the environment variable named in its
//! help text. [`RestarterConfig::validate`] turns the raw values into the
//! immutable filter and health check settings; any violation is fatal before
//! the watch starts.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::controller::{ExecCheck, FilterConfig, HealthCheckConfig};
use crate::error::{Error, Result};

/// Recycles unhealthy pods of a StatefulSet and/or label selector
#[derive(Parser, Debug, Clone)]
#[command(name = "pod-restarter", version, about, long_about = None)]
pub struct RestarterConfig {
    /// Kubernetes namespace to watch
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// StatefulSet whose pods are monitored
    #[arg(long = "statefulset", env = "STATEFULSET_NAME")]
    pub statefulset: Option<String>,

    /// Pod label selector (e.g. 'app=router,component=druid')
    #[arg(long, env = "POD_LABEL_SELECTOR")]
    pub pod_label_selector: Option<String>,

    /// HTTP health check path (e.g. /health), queried on port 8080
    #[arg(long, env = "HEALTH_CHECK_URL")]
    pub health_check_url: Option<String>,

    /// Timeout for HTTP, TCP and exec checks (e.g. 5s, 500ms, 1m)
    #[arg(long, env = "HEALTH_CHECK_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub health_check_timeout: Duration,

    /// Command run with `sh -c` inside the container (e.g. 'ps aux | grep java')
    #[arg(long, env = "EXEC_CHECK_COMMAND")]
    pub exec_check_command: Option<String>,

    /// Container for the exec check (empty for the first container)
    #[arg(long, env = "EXEC_CHECK_CONTAINER")]
    pub exec_check_container: Option<String>,

    /// Expected exec output (empty to check the exit code only)
    #[arg(long, env = "EXEC_CHECK_EXPECTED")]
    pub exec_check_expected: Option<String>,

    /// TCP port to check for connectivity (0 disables)
    #[arg(long, env = "TCP_CHECK_PORT", default_value_t = 0)]
    pub tcp_check_port: u16,

    /// Bind address for /healthz, /readyz and /metrics ("0" disables)
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0")]
    pub health_probe_bind_address: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl RestarterConfig {
    /// Validate the raw settings into filter and health check configuration
    pub fn validate(&self) -> Result<(FilterConfig, HealthCheckConfig)> {
        if self.namespace.trim().is_empty() {
            return Err(Error::ConfigError("--namespace must not be empty".to_string()));
        }

        let filter = FilterConfig::new(
            non_empty(&self.statefulset),
            non_empty(&self.pod_label_selector),
        )?;

        if self.health_check_timeout.is_zero() {
            return Err(Error::ConfigError(
                "--health-check-timeout must be greater than zero".to_string(),
            ));
        }

        let mut health = HealthCheckConfig::default()
            .with_timeout(self.health_check_timeout)
            .with_tcp_port(self.tcp_check_port);

        if let Some(path) = non_empty(&self.health_check_url) {
            if !path.starts_with('/') {
                return Err(Error::ConfigError(format!(
                    "--health-check-url must be a path starting with '/', got {:?}",
                    path
                )));
            }
            health = health.with_http_path(path);
        }

        match non_empty(&self.exec_check_command) {
            Some(command) => {
                health = health.with_exec(ExecCheck {
                    command: command.to_string(),
                    container: non_empty(&self.exec_check_container)
                        .unwrap_or_default()
                        .to_string(),
                    expected_output: self.exec_check_expected.clone().unwrap_or_default(),
                });
            }
            None => {
                if non_empty(&self.exec_check_container).is_some()
                    || non_empty(&self.exec_check_expected).is_some()
                {
                    return Err(Error::ConfigError(
                        "--exec-check-container and --exec-check-expected require --exec-check-command"
                            .to_string(),
                    ));
                }
            }
        }

        Ok((filter, health))
    }

    /// Probe server address; `None` when disabled
    ///
    /// Accepts `host:port` or the `:port` shorthand for all interfaces.
    pub fn probe_address(&self) -> Result<Option<SocketAddr>> {
        let raw = self.health_probe_bind_address.trim();
        if raw.is_empty() || raw == "0" {
            return Ok(None);
        }

        let candidate = if raw.starts_with(':') {
            format!("0.0.0.0{}", raw)
        } else {
            raw.to_string()
        };

        candidate.parse().map(Some).map_err(|e| {
            Error::ConfigError(format!(
                "invalid --health-probe-bind-address {:?}: {}",
                raw, e
            ))
        })
    }
}

/// Parse durations such as `5s`, `250ms`, `1m30s` or `1.5h`
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", text))?;
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", text));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", text))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, text)),
        };
        rest = &rest[unit_len..];

        total += Duration::from_nanos((value * nanos_per_unit).round() as u64);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RestarterConfig {
        let mut argv = vec!["pod-restarter"];
        argv.extend_from_slice(args);
        RestarterConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_defaults_require_a_filter() {
        let config = parse(&[]);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.health_check_timeout, Duration::from_secs(5));
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_statefulset_only() {
        let config = parse(&["--namespace", "druid", "--statefulset", "router"]);
        let (filter, health) = config.validate().unwrap();

        assert_eq!(filter.owner_group(), Some("router"));
        assert!(filter.label_selector().is_none());
        assert_eq!(health, HealthCheckConfig::default());
    }

    #[test]
    fn test_all_layers_configured() {
        let config = parse(&[
            "--pod-label-selector",
            "app=router,component=druid",
            "--health-check-url",
            "/status/health",
            "--health-check-timeout",
            "2s",
            "--tcp-check-port",
            "8081",
            "--exec-check-command",
            "ps aux | grep java",
            "--exec-check-expected",
            "java",
        ]);
        let (filter, health) = config.validate().unwrap();

        assert_eq!(filter.label_selector().unwrap().requirements().len(), 2);
        assert_eq!(health.http_path.as_deref(), Some("/status/health"));
        assert_eq!(health.tcp_port, Some(8081));
        assert_eq!(health.timeout, Duration::from_secs(2));

        let exec = health.exec.unwrap();
        assert_eq!(exec.command, "ps aux | grep java");
        assert_eq!(exec.container, "");
        assert_eq!(exec.expected_output, "java");
    }

    #[test]
    fn test_invalid_settings_are_fatal() {
        let bad_selector = parse(&["--pod-label-selector", "app in (router"]);
        assert!(matches!(bad_selector.validate(), Err(Error::InvalidSelector(_))));

        let bad_path = parse(&["--statefulset", "router", "--health-check-url", "health"]);
        assert!(matches!(bad_path.validate(), Err(Error::ConfigError(_))));

        let expected_without_command =
            parse(&["--statefulset", "router", "--exec-check-expected", "java"]);
        assert!(matches!(
            expected_without_command.validate(),
            Err(Error::ConfigError(_))
        ));

        let zero_timeout = parse(&["--statefulset", "router", "--health-check-timeout", "0s"]);
        assert!(matches!(zero_timeout.validate(), Err(Error::ConfigError(_))));

        assert!(RestarterConfig::try_parse_from([
            "pod-restarter",
            "--health-check-timeout",
            "soon"
        ])
        .is_err());
    }

    #[test]
    fn test_probe_address() {
        let mut config = parse(&["--statefulset", "router"]);
        assert_eq!(config.probe_address().unwrap(), None);

        config.health_probe_bind_address = ":8080".to_string();
        assert_eq!(
            config.probe_address().unwrap(),
            Some("0.0.0.0:8080".parse().unwrap())
        );

        config.health_probe_bind_address = "127.0.0.1:9090".to_string();
        assert_eq!(
            config.probe_address().unwrap(),
            Some("127.0.0.1:9090".parse().unwrap())
        );

        config.health_probe_bind_address = "localhost".to_string();
        assert!(config.probe_address().is_err());
    }
}
