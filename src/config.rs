//! CLI configuration (spec.md §6 "External interfaces"), matching the
//! teacher's CLI module conventions: `clap` derive with an `env` fallback so
//! every flag is also settable via an environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// `machine-lifecycle-controller` CLI flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "machine-lifecycle-controller")]
#[command(about = "Cluster-level machine health check and disruption budget controller")]
#[command(version)]
pub struct Config {
    /// How long a newly-created Machine may go without an observed Node
    /// before it counts as unhealthy (spec.md §4.3).
    #[arg(long, env = "MHC_NODE_APPEAR_TIMEOUT", default_value = "10m", value_parser = parse_duration)]
    pub node_appear_timeout: Duration,

    /// How long a disrupted machine stays excluded from the healthy count
    /// before the MDB reconciler garbage-collects the entry (spec.md §4.6).
    #[arg(long, env = "MHC_DISRUPTION_WINDOW", default_value = "2m", value_parser = parse_duration)]
    pub disruption_window: Duration,

    /// Number of concurrent reconcile workers per controller.
    #[arg(long, env = "MHC_WORKER_COUNT", default_value_t = 1)]
    pub worker_count: usize,

    /// Restrict watches to a single namespace; unset watches all namespaces.
    #[arg(long, env = "MHC_NAMESPACE")]
    pub namespace: Option<String>,

    /// Bind address for the `/metrics` HTTP endpoint.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "MHC_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Namespace the leader-election Lease object lives in.
    #[arg(long, env = "MHC_LEADER_ELECTION_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Log output format.
    #[arg(long, env = "MHC_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::parse_from(["machine-lifecycle-controller"]);
        assert_eq!(config.node_appear_timeout, Duration::from_secs(600));
        assert_eq!(config.disruption_window, Duration::from_secs(120));
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.namespace, None);
        assert_eq!(config.leader_election_namespace, "default");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "machine-lifecycle-controller",
            "--node-appear-timeout",
            "5m",
            "--worker-count",
            "4",
            "--namespace",
            "machines",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.node_appear_timeout, Duration::from_secs(300));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.namespace.as_deref(), Some("machines"));
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
