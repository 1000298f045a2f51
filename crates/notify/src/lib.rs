//! Incident delivery for service alerts.
//!
//! This crate turns trigger/resolve decisions made by the alert engines into
//! events on an external incident service (PagerDuty).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use incident_notify::{AlertEvent, Dispatcher, IncidentTag, PagerDutyChannel};
//!
//! # async fn run() {
//! let dispatcher = Dispatcher::with_channels(vec![Arc::new(PagerDutyChannel::new())]);
//!
//! dispatcher
//!     .dispatch(AlertEvent::trigger(
//!         IncidentTag::Consul,
//!         "web",
//!         "integration-key",
//!         "web is in CRITICAL state",
//!     ))
//!     .await;
//! # }
//! ```
//!
//! # Failure policy
//!
//! Delivery is best-effort. [`Dispatcher::dispatch`] never returns an error:
//! every channel failure is logged and the caller continues with its next
//! alert. The returned [`DispatchOutcome`] lets callers and tests observe
//! what happened.
//!
//! # Architecture
//!
//! - [`AlertChannel`] trait defines the interface for delivery channels
//! - [`PagerDutyChannel`] implements the PagerDuty Events API
//! - [`Dispatcher`] sends each event to all enabled channels

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::pagerduty::PagerDutyChannel;
pub use channels::AlertChannel;
pub use error::ChannelError;
pub use events::{AlertAction, AlertEvent, IncidentTag};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every enabled channel accepted the event
    Delivered,
    /// At least one channel failed (already logged)
    Failed,
    /// Delivery is switched off; the event was only logged
    Suppressed,
}

/// Central alert dispatcher.
///
/// Holds the delivery channels and applies the single failure policy
/// (log and continue) for every engine.
pub struct Dispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
    disabled: bool,
}

impl Dispatcher {
    /// Create a dispatcher with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        if channels.is_empty() {
            warn!("No alert channels configured");
        } else {
            info!(channel_count = channels.len(), "Alert dispatcher initialized");
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled dispatcher (alert switch off, or tests).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any delivery channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send an event to all enabled channels and wait for them.
    ///
    /// Errors are logged, never propagated.
    pub async fn dispatch(&self, event: AlertEvent) -> DispatchOutcome {
        if !self.has_channels() {
            info!(
                action = %event.action,
                incident_key = %event.incident_key,
                message = %event.message,
                "Alert delivery disabled, event not sent"
            );
            return DispatchOutcome::Suppressed;
        }

        let sends = self
            .channels
            .iter()
            .filter(|channel| channel.enabled())
            .map(|channel| {
                let event = &event;
                async move { (channel.name(), channel.send(event).await) }
            });

        let mut outcome = DispatchOutcome::Delivered;
        for (channel_name, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => {
                    debug!(
                        channel = channel_name,
                        action = %event.action,
                        incident_key = %event.incident_key,
                        "Alert delivered"
                    );
                }
                Err(e) => {
                    error!(
                        channel = channel_name,
                        action = %event.action,
                        incident_key = %event.incident_key,
                        error = %e,
                        "Failed to deliver alert"
                    );
                    outcome = DispatchOutcome::Failed;
                }
            }
        }

        outcome
    }
}
