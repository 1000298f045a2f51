//! Service Alerter
//!
//! Watches a Nomad cluster and its Consul service mesh and raises incidents
//! for unhealthy workloads:
//!
//! - [`health`]: services failing Consul health checks past a threshold
//! - [`allocations`]: jobs running more or fewer instances than declared,
//!   and allocations stuck restarting
//!
//! Both engines read per-job opt-in flags from Nomad job metadata, kept
//! fresh by [`metadata::MetadataRefresher`], and deliver through a shared
//! [`incident_notify::Dispatcher`].

pub mod allocations;
pub mod config;
pub mod consul;
pub mod duration;
pub mod error;
pub mod health;
mod http;
pub mod metadata;
pub mod nomad;
pub mod server;
pub mod telemetry;
pub mod window;

#[cfg(test)]
mod testing;

use std::fmt;

/// Environment and region labels decorated onto alert messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertLabels {
    pub env: String,
    pub region: String,
}

impl AlertLabels {
    pub fn new(env: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for AlertLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.env, self.region)
    }
}
