//! Service → job metadata map shared between the refresher and the health
//! engine.
//!
//! The map is published as whole, immutable snapshots. Readers take an
//! `Arc` to the current snapshot and never observe a partially built map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::nomad::Orchestrator;

/// Job metadata keys operators set to opt into alerting.
pub mod keys {
    pub const PD_SERVICE_KEY: &str = "pd_service_key";
    pub const HEALTHCHECK_ENABLED: &str = "consul_service_healthcheck_enabled";
    pub const HEALTHCHECK_THRESHOLD: &str = "consul_service_healthcheck_threshold";
    pub const ORPHANED_ALERT_ENABLED: &str = "orphaned_instances_alert_enabled";
    pub const QUEUED_ALERT_ENABLED: &str = "queued_instances_alert_enabled";
    pub const RESTART_LOOP_ALERT_ENABLED: &str = "restart_loop_alerting_enabled";
}

/// The `Meta` map of a Nomad job.
pub type JobMetadata = HashMap<String, String>;

/// Value of a metadata key, empty when absent.
pub fn meta_value<'a>(meta: &'a JobMetadata, key: &str) -> &'a str {
    meta.get(key).map_or("", String::as_str)
}

/// A metadata toggle is on only when set to `true`; absence means off.
pub fn flag_enabled(meta: &JobMetadata, key: &str) -> bool {
    meta.get(key)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// A metadata toggle that is on whenever the key exists, whatever its value.
/// Used by the orphaned and queued instance alerts.
pub fn flag_present(meta: &JobMetadata, key: &str) -> bool {
    meta.contains_key(key)
}

/// One published generation of the service map.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    /// Monotonic publication counter; 0 means nothing published yet
    pub version: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub services: HashMap<String, JobMetadata>,
}

impl MetadataSnapshot {
    pub fn get(&self, service: &str) -> Option<&JobMetadata> {
        self.services.get(service)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Shared, versioned holder of the current [`MetadataSnapshot`].
///
/// The lock is held only to swap or clone the `Arc`.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    current: Arc<RwLock<Arc<MetadataSnapshot>>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot wholesale. Returns the new version.
    pub async fn publish(&self, services: HashMap<String, JobMetadata>) -> u64 {
        let mut current = self.current.write().await;
        let version = current.version + 1;
        *current = Arc::new(MetadataSnapshot {
            version,
            refreshed_at: Some(Utc::now()),
            services,
        });
        version
    }

    /// The most recently published snapshot.
    pub async fn current(&self) -> Arc<MetadataSnapshot> {
        Arc::clone(&*self.current.read().await)
    }
}

/// Periodically rebuilds the service map from Nomad jobs.
pub struct MetadataRefresher {
    orchestrator: Arc<dyn Orchestrator>,
    store: MetadataStore,
    interval: Duration,
}

impl MetadataRefresher {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: MetadataStore,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            interval,
        }
    }

    /// Build a fresh map and publish it.
    ///
    /// Returns the published version, or `None` when the job list could not
    /// be fetched (the previous snapshot stays current).
    pub async fn refresh_once(&self) -> Option<u64> {
        let jobs = match self.orchestrator.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Cannot get job list from Nomad");
                return None;
            }
        };

        let mut services = HashMap::new();
        for summary in jobs {
            let job = match self.orchestrator.get_job(&summary.id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(job = %summary.id, error = %e, "Cannot get job info from Nomad");
                    continue;
                }
            };

            if job.is_periodic() || job.is_system() || job.is_batch() {
                continue;
            }

            let Some(service) = job.primary_service() else {
                debug!(job = %job.id, "Job declares no service, skipping");
                continue;
            };

            services.insert(service.to_string(), job.meta.clone());
        }

        let count = services.len();
        let previous = self.store.current().await.refreshed_at;
        let version = self.store.publish(services).await;
        debug!(
            version,
            services = count,
            previous_refresh = ?previous,
            "Published service metadata"
        );
        Some(version)
    }

    /// Refresh forever on the configured interval.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Metadata refresher started");
        loop {
            self.refresh_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
