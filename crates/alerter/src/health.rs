//! Consul health-check alerting.
//!
//! Long-polls Consul for services in critical state and raises an incident
//! once a service has stayed critical for its configured threshold. The
//! incident is raised once per critical episode and resolved the first cycle
//! the service is no longer critical.
//!
//! ```text
//!              critical            elapsed >= threshold
//!  untracked ───────────► tracked ─────────────────────► triggered
//!      ▲                    │                               │
//!      │  not critical      │        not critical           │
//!      └────────────────────┴───────── (resolve) ───────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use incident_notify::{AlertEvent, Dispatcher, IncidentTag};
use tracing::{debug, error, info, warn};

use crate::consul::{next_wait_index, HealthCheck, ServiceMesh};
use crate::duration::parse_go_duration;
use crate::error::ClientResult;
use crate::metadata::{flag_enabled, keys, meta_value, JobMetadata, MetadataStore};
use crate::AlertLabels;

/// Threshold used when `consul_service_healthcheck_threshold` is missing or
/// malformed. Zero makes the service eligible on its first critical cycle.
pub const FALLBACK_HEALTHCHECK_THRESHOLD: Duration = Duration::ZERO;

/// Nomad registers services with IDs of the form
/// `_nomad-executor-<alloc-uuid>-<task>-<service>-<port>`; bytes 16..24 are
/// the first 8 characters of the allocation UUID.
const ALLOC_ID_OFFSET: usize = 16;
const ALLOC_ID_LEN: usize = 8;

/// Pause after a failed blocking query before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Extract the short allocation id from a Nomad-registered Consul service ID.
///
/// Returns `None` when the identifier is too short or the offsets do not
/// fall on character boundaries.
pub fn allocation_id_fragment(service_id: &str) -> Option<&str> {
    service_id.get(ALLOC_ID_OFFSET..ALLOC_ID_OFFSET + ALLOC_ID_LEN)
}

/// Resolve the alerting threshold for a service from its job metadata.
pub fn healthcheck_threshold(service: &str, meta: &JobMetadata) -> Duration {
    let raw = meta_value(meta, keys::HEALTHCHECK_THRESHOLD);
    match parse_go_duration(raw) {
        Ok(threshold) => threshold,
        Err(e) => {
            warn!(
                service,
                value = raw,
                error = %e,
                fallback_secs = FALLBACK_HEALTHCHECK_THRESHOLD.as_secs(),
                "Invalid health-check threshold, using fallback"
            );
            FALLBACK_HEALTHCHECK_THRESHOLD
        }
    }
}

/// An incident currently open for a service.
#[derive(Debug, Clone)]
pub struct TriggeredAlert {
    /// Integration key the trigger went to; the resolve goes to the same one
    pub routing_key: String,
    pub triggered_at: DateTime<Utc>,
}

/// What one processing cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCycleReport {
    pub triggered: Vec<String>,
    pub resolved: Vec<String>,
    /// Services dropped because Nomad does not know them
    pub unregistered: Vec<String>,
}

/// Health-check alert engine.
pub struct HealthAlertEngine {
    mesh: Arc<dyn ServiceMesh>,
    store: MetadataStore,
    dispatcher: Arc<Dispatcher>,
    labels: AlertLabels,
    wait: Duration,
    wait_index: u64,
    first_critical: HashMap<String, DateTime<Utc>>,
    triggered: HashMap<String, TriggeredAlert>,
}

impl HealthAlertEngine {
    pub fn new(
        mesh: Arc<dyn ServiceMesh>,
        store: MetadataStore,
        dispatcher: Arc<Dispatcher>,
        labels: AlertLabels,
        wait: Duration,
    ) -> Self {
        Self {
            mesh,
            store,
            dispatcher,
            labels,
            wait,
            wait_index: 0,
            first_critical: HashMap::new(),
            triggered: HashMap::new(),
        }
    }

    /// When the service was first seen critical in its current episode.
    pub fn critical_since(&self, service: &str) -> Option<DateTime<Utc>> {
        self.first_critical.get(service).copied()
    }

    pub fn is_triggered(&self, service: &str) -> bool {
        self.triggered.contains_key(service)
    }

    pub fn wait_index(&self) -> u64 {
        self.wait_index
    }

    /// Run one blocking query and process its result.
    pub async fn poll_once(&mut self) -> ClientResult<HealthCycleReport> {
        let result = self.mesh.critical_checks(self.wait_index, self.wait).await?;
        self.wait_index = next_wait_index(self.wait_index, result.index);
        Ok(self.process(&result.checks, Utc::now()).await)
    }

    /// Poll forever.
    pub async fn run(mut self) {
        info!(wait_secs = self.wait.as_secs(), "Health alert engine started");
        loop {
            match self.poll_once().await {
                Ok(report) => {
                    if !report.triggered.is_empty() || !report.resolved.is_empty() {
                        info!(
                            triggered = report.triggered.len(),
                            resolved = report.resolved.len(),
                            "Health alert cycle complete"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to query Consul for critical checks");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Apply one snapshot of critical checks observed at `now`.
    pub async fn process(
        &mut self,
        checks: &[HealthCheck],
        now: DateTime<Utc>,
    ) -> HealthCycleReport {
        let critical: HashSet<&str> = checks
            .iter()
            .map(|check| check.service_name.as_str())
            .filter(|name| !name.is_empty())
            .collect();

        for service in &critical {
            self.first_critical
                .entry((*service).to_string())
                .or_insert(now);
        }

        let snapshot = self.store.current().await;
        let tracked: BTreeMap<String, DateTime<Utc>> = self
            .first_critical
            .iter()
            .map(|(service, since)| (service.clone(), *since))
            .collect();

        let mut report = HealthCycleReport::default();
        for (service, since) in tracked {
            let Some(meta) = snapshot.get(&service) else {
                info!(
                    service = %service,
                    "Service not registered on Nomad, removed from alert list"
                );
                if self.clear(&service, now).await {
                    report.resolved.push(service.clone());
                }
                report.unregistered.push(service);
                continue;
            };

            if !critical.contains(service.as_str()) {
                if self.clear(&service, now).await {
                    report.resolved.push(service);
                }
                continue;
            }

            info!(
                env = %self.labels.env,
                region = %self.labels.region,
                service = %service,
                "Service is in CRITICAL state"
            );

            if self.triggered.contains_key(&service)
                || !flag_enabled(meta, keys::HEALTHCHECK_ENABLED)
            {
                continue;
            }

            let threshold = healthcheck_threshold(&service, meta);
            let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
            if elapsed < threshold {
                debug!(
                    service = %service,
                    elapsed_secs = elapsed.as_secs(),
                    threshold_secs = threshold.as_secs(),
                    "Below threshold"
                );
                continue;
            }

            let routing_key = meta_value(meta, keys::PD_SERVICE_KEY).to_string();
            self.trigger(&service, routing_key, now).await;
            report.triggered.push(service);
        }

        report
    }

    /// Send the trigger and mark the service triggered. The mark is set
    /// whatever the delivery outcome; failures are logged by the dispatcher.
    async fn trigger(&mut self, service: &str, routing_key: String, now: DateTime<Utc>) {
        let allocations = self.critical_allocations(service).await;
        let message = format!(
            "[Consul Healthcheck {}] Job : {} is in CRITICAL state. \
             Allocations in Critical state : [{}]",
            self.labels,
            service,
            allocations.join(" ")
        );
        info!(service, message = %message, "Triggering health-check alert");

        let event =
            AlertEvent::trigger(IncidentTag::Consul, service, routing_key.clone(), message);
        self.dispatcher.dispatch(event).await;

        self.triggered.insert(
            service.to_string(),
            TriggeredAlert {
                routing_key,
                triggered_at: now,
            },
        );
    }

    /// Forget a service; resolves its incident first if one is open.
    /// Returns whether a resolve was sent.
    async fn clear(&mut self, service: &str, now: DateTime<Utc>) -> bool {
        self.first_critical.remove(service);
        let Some(alert) = self.triggered.remove(service) else {
            return false;
        };

        let open_secs = (now - alert.triggered_at).num_seconds();
        let event =
            AlertEvent::resolve(IncidentTag::Consul, service, alert.routing_key, "resolved");
        self.dispatcher.dispatch(event).await;
        info!(service, open_secs, "Alert is resolved for service");
        true
    }

    /// Short allocation ids of every non-passing check of `service`.
    async fn critical_allocations(&self, service: &str) -> Vec<String> {
        let checks = match self.mesh.service_checks(service).await {
            Ok(checks) => checks,
            Err(e) => {
                warn!(service, error = %e, "Cannot fetch health checks for service");
                return vec![];
            }
        };

        checks
            .iter()
            .filter(|check| !check.is_passing())
            .filter_map(|check| {
                let fragment = allocation_id_fragment(&check.service_id);
                if fragment.is_none() {
                    warn!(
                        service,
                        service_id = %check.service_id,
                        "Service ID does not carry an allocation id, skipping"
                    );
                }
                fragment.map(str::to_string)
            })
            .collect()
    }
}
