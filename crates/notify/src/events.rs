//! Alert event types delivered to the incident service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an event does to its incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    /// Open (or re-assert) the incident
    Trigger,
    /// Close the incident
    Resolve,
}

impl AlertAction {
    /// Wire name used by the PagerDuty Events API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Resolve => "resolve",
        }
    }
}

impl std::fmt::Display for AlertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of an alert. The tag prefixes the incident key so that every
/// trigger/resolve for the same condition collapses onto one incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentTag {
    /// Consul health-check failures, keyed by service name
    Consul,
    /// Orphaned allocations / queued instances, keyed by job id
    Service,
    /// Restart loops, keyed by the bare job id
    RestartLoop,
}

impl IncidentTag {
    /// Prefix prepended to the subject to form the incident key.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Consul => "consul",
            Self::Service => "service",
            Self::RestartLoop => "",
        }
    }

    /// Build the incident key for a subject (service name or job id).
    #[must_use]
    pub fn incident_key(self, subject: &str) -> String {
        format!("{}{subject}", self.prefix())
    }
}

/// A single trigger or resolve event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub action: AlertAction,
    pub incident_key: String,
    /// Integration key of the receiving service (`pd_service_key`)
    pub routing_key: String,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// Create a trigger event for `subject`.
    pub fn trigger(
        tag: IncidentTag,
        subject: &str,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(AlertAction::Trigger, tag, subject, routing_key, message)
    }

    /// Create a resolve event for `subject`.
    pub fn resolve(
        tag: IncidentTag,
        subject: &str,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(AlertAction::Resolve, tag, subject, routing_key, message)
    }

    fn new(
        action: AlertAction,
        tag: IncidentTag,
        subject: &str,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action,
            incident_key: tag.incident_key(subject),
            routing_key: routing_key.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
