//! PagerDuty Events API (v1) delivery channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::AlertEvent;
use crate::AlertChannel;

/// Events API v1 generic endpoint.
pub const DEFAULT_EVENTS_URL: &str =
    "https://events.pagerduty.com/generic/2010-04-15/create_event.json";

/// Fallback wait when PagerDuty throttles without a `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// PagerDuty delivery channel.
pub struct PagerDutyChannel {
    events_url: String,
    client: reqwest::Client,
}

impl PagerDutyChannel {
    /// Create a channel targeting the public PagerDuty endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_url(DEFAULT_EVENTS_URL)
    }

    /// Create a channel targeting a specific events endpoint.
    #[must_use]
    pub fn with_url(events_url: impl Into<String>) -> Self {
        Self {
            events_url: events_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a channel reusing a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(events_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            events_url: events_url.into(),
            client,
        }
    }

    /// Request timeout applied when building the default client.
    pub fn with_timeout(
        events_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(events_url, client))
    }

    fn format_payload(event: &AlertEvent) -> EventPayload<'_> {
        EventPayload {
            service_key: &event.routing_key,
            event_type: event.action.as_str(),
            incident_key: &event.incident_key,
            description: &event.message,
        }
    }
}

impl Default for PagerDutyChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertChannel for PagerDutyChannel {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    fn enabled(&self) -> bool {
        !self.events_url.is_empty()
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), ChannelError> {
        if event.routing_key.is_empty() {
            return Err(ChannelError::NotConfigured("pd_service_key".to_string()));
        }

        let payload = Self::format_payload(event);

        debug!(
            channel = "pagerduty",
            action = %event.action,
            incident_key = %event.incident_key,
            "Sending event"
        );

        let response = self
            .client
            .post(&self.events_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let ack: EventResponse = response.json().await.unwrap_or_default();
            debug!(
                channel = "pagerduty",
                status = %ack.status,
                incident_key = ?ack.incident_key,
                "Event accepted"
            );
            return Ok(());
        }

        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ChannelError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            channel = "pagerduty",
            status = %status,
            body = %body,
            "PagerDuty rejected event"
        );

        Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

// =============================================================================
// PagerDuty API types
// =============================================================================

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    service_key: &'a str,
    event_type: &'a str,
    incident_key: &'a str,
    description: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct EventResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    incident_key: Option<String>,
}
