//! Command-line and environment configuration.
//!
//! Environment variable names follow the existing deployment contract
//! (`nomad_server`, `consul_server`, ...), so every flag can be set either way.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use incident_notify::channels::pagerduty::DEFAULT_EVENTS_URL;

use crate::AlertLabels;

/// Alert-switch values that turn delivery off.
const SWITCH_OFF: &[&str] = &["off", "false", "0", "disabled"];

/// Nomad/Consul service alerter - raises incidents for unhealthy workloads
#[derive(Debug, Clone, Parser)]
#[command(name = "service-alerter")]
#[command(version)]
pub struct Cli {
    /// Nomad API address
    #[arg(long, env = "nomad_server", default_value = "http://127.0.0.1:4646")]
    pub nomad_addr: String,

    /// Consul API address
    #[arg(long, env = "consul_server", default_value = "http://127.0.0.1:8500")]
    pub consul_addr: String,

    /// Consul datacenter to query (agent default when unset)
    #[arg(long, env = "consul_datacenter")]
    pub consul_datacenter: Option<String>,

    /// Incident delivery switch (`off`, `false`, `0` or `disabled` to log only)
    #[arg(long, env = "alert_switch", default_value = "on")]
    pub alert_switch: String,

    /// Environment label added to alert messages
    #[arg(long, env = "env", default_value = "")]
    pub env: String,

    /// Region label added to alert messages
    #[arg(long, env = "region", default_value = "")]
    pub region: String,

    /// Address for the liveness endpoint
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Seconds between job metadata refreshes
    #[arg(long, env = "METADATA_REFRESH_SECS", default_value = "30")]
    pub metadata_refresh_secs: u64,

    /// Seconds between allocation checks
    #[arg(long, env = "ALLOCATION_INTERVAL_SECS", default_value = "60")]
    pub allocation_interval_secs: u64,

    /// Maximum seconds a Consul blocking query waits for changes
    #[arg(long, env = "CONSUL_WAIT_SECS", default_value = "60")]
    pub consul_wait_secs: u64,

    /// Minimum allocation age in seconds before allocation checks apply
    #[arg(long, env = "PENDING_AGE_SECS", default_value = "300")]
    pub pending_age_secs: u64,

    /// PagerDuty events endpoint
    #[arg(long, env = "PAGERDUTY_EVENTS_URL", default_value = DEFAULT_EVENTS_URL)]
    pub pagerduty_url: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Timeout in seconds for ordinary upstream requests
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "90")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Whether incidents are actually delivered.
    pub fn alerts_enabled(&self) -> bool {
        alert_switch_enabled(&self.alert_switch)
    }

    pub fn labels(&self) -> AlertLabels {
        AlertLabels::new(&self.env, &self.region)
    }

    pub fn metadata_refresh(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_secs)
    }

    pub fn allocation_interval(&self) -> Duration {
        Duration::from_secs(self.allocation_interval_secs)
    }

    pub fn consul_wait(&self) -> Duration {
        Duration::from_secs(self.consul_wait_secs)
    }

    pub fn pending_age(&self) -> Duration {
        Duration::from_secs(self.pending_age_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

pub fn alert_switch_enabled(value: &str) -> bool {
    let value = value.trim();
    !SWITCH_OFF.iter().any(|off| value.eq_ignore_ascii_case(off))
}
