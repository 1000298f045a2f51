//! Allocation-level alerting: replica drift and restart loops.
//!
//! Every cycle walks all allocations on all nodes. Long-lived allocations
//! are grouped per job and compared to the count the job declares; the
//! difference is reported as orphaned (too many) or queued (too few).
//! Allocations stuck in `pending` are counted across a tumbling window of
//! cycles and reported as restart loops when pending in every cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use incident_notify::{AlertEvent, Dispatcher, IncidentTag};
use tracing::{debug, error, info, warn};

use crate::metadata::{flag_enabled, flag_present, keys, meta_value};
use crate::nomad::{
    Allocation, Orchestrator, JOB_TYPE_SYSTEM, STATUS_PENDING, STATUS_RUNNING,
};
use crate::window::CycleWindow;
use crate::AlertLabels;

/// Minimum allocation age before it takes part in any check.
pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(300);

/// Cycles a pending allocation must span to count as a restart loop.
pub const RESTART_LOOP_WINDOW_CYCLES: u32 = 3;

/// Job IDs of periodic children contain this marker.
const PERIODIC_MARKER: &str = "periodic";

fn older_than(alloc: &Allocation, now: DateTime<Utc>, min_age: Duration) -> bool {
    (now - alloc.created_at())
        .to_std()
        .is_ok_and(|age| age > min_age)
}

/// Whether the allocation counts toward its job's observed instances.
///
/// Running allocations always count; pending ones count unless they belong
/// to a system job or a periodic child.
pub fn is_long_lived(alloc: &Allocation, now: DateTime<Utc>, min_age: Duration) -> bool {
    let running = alloc.client_status == STATUS_RUNNING;
    let pending_counted = alloc.client_status == STATUS_PENDING
        && alloc.job_type() != JOB_TYPE_SYSTEM
        && !alloc.job_id.contains(PERIODIC_MARKER);
    (running || pending_counted) && older_than(alloc, now, min_age)
}

/// Whether the allocation is a restart-loop candidate this cycle.
pub fn is_stuck_pending(alloc: &Allocation, now: DateTime<Utc>, min_age: Duration) -> bool {
    alloc.client_status == STATUS_PENDING
        && !alloc.job_id.contains(PERIODIC_MARKER)
        && older_than(alloc, now, min_age)
}

/// An (allocation, job) pair tracked by the restart-loop window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingKey {
    pub allocation_id: String,
    pub job_id: String,
}

/// Allocations of one cycle, sorted into the two checks.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Job id → ids of its long-lived allocations
    pub long_lived: BTreeMap<String, Vec<String>>,
    pub pending: Vec<PendingKey>,
}

impl Classification {
    pub fn add(&mut self, alloc: &Allocation, now: DateTime<Utc>, min_age: Duration) {
        if is_long_lived(alloc, now, min_age) {
            self.long_lived
                .entry(alloc.job_id.clone())
                .or_default()
                .push(alloc.id.clone());
        }
        if is_stuck_pending(alloc, now, min_age) {
            self.pending.push(PendingKey {
                allocation_id: alloc.id.clone(),
                job_id: alloc.job_id.clone(),
            });
        }
    }
}

/// Difference between declared and observed instance counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaDrift {
    /// More instances than declared
    Orphaned(u64),
    /// Fewer instances than declared
    Queued(u64),
}

pub fn replica_drift(expected: u64, observed: u64) -> Option<ReplicaDrift> {
    match observed.cmp(&expected) {
        std::cmp::Ordering::Greater => Some(ReplicaDrift::Orphaned(observed - expected)),
        std::cmp::Ordering::Less => Some(ReplicaDrift::Queued(expected - observed)),
        std::cmp::Ordering::Equal => None,
    }
}

/// Alerts sent during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationCycleReport {
    /// Jobs alerted for replica drift with the drift found
    pub drift: Vec<(String, ReplicaDrift)>,
    /// Jobs alerted for restart loops with the looping allocation ids
    pub restart_loops: Vec<(String, Vec<String>)>,
    /// Whether this cycle closed a restart-loop window
    pub window_reset: bool,
}

pub struct AllocationAlertEngine {
    orchestrator: Arc<dyn Orchestrator>,
    dispatcher: Arc<Dispatcher>,
    labels: AlertLabels,
    interval: Duration,
    min_age: Duration,
    window: CycleWindow<PendingKey>,
}

impl AllocationAlertEngine {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        dispatcher: Arc<Dispatcher>,
        labels: AlertLabels,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            dispatcher,
            labels,
            interval,
            min_age: DEFAULT_MIN_AGE,
            window: CycleWindow::new(RESTART_LOOP_WINDOW_CYCLES),
        }
    }

    #[must_use]
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    pub fn pending_count(&self, allocation_id: &str, job_id: &str) -> u32 {
        self.window.count(&PendingKey {
            allocation_id: allocation_id.to_string(),
            job_id: job_id.to_string(),
        })
    }

    /// 1-based cycle number inside the current restart-loop window.
    pub fn window_cycle(&self) -> u32 {
        self.window.current_cycle()
    }

    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            min_age_secs = self.min_age.as_secs(),
            "Allocation alert engine started"
        );
        loop {
            let report = self.run_cycle(Utc::now()).await;
            debug!(
                drift_alerts = report.drift.len(),
                restart_loop_alerts = report.restart_loops.len(),
                window_reset = report.window_reset,
                "Allocation cycle complete"
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run one cycle as of `now`.
    ///
    /// A failed node listing still counts as a cycle of the window.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> AllocationCycleReport {
        let classification = self.collect(now).await;

        for key in &classification.pending {
            self.window.observe(key.clone());
        }
        for (key, count) in self.window.entries() {
            info!(
                allocation = %key.allocation_id,
                job = %key.job_id,
                count,
                "Allocation pending"
            );
        }

        let mut report = AllocationCycleReport {
            drift: self.check_replicas(&classification.long_lived).await,
            restart_loops: self.check_restart_loops().await,
            window_reset: false,
        };
        report.window_reset = self.window.end_cycle();
        report
    }

    async fn collect(&self, now: DateTime<Utc>) -> Classification {
        let mut classification = Classification::default();

        let nodes = match self.orchestrator.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Cannot get node list from Nomad");
                return classification;
            }
        };

        for node in nodes {
            match self.orchestrator.list_allocations(&node.id).await {
                Ok(allocations) => {
                    for alloc in &allocations {
                        classification.add(alloc, now, self.min_age);
                    }
                }
                Err(e) => {
                    error!(node = %node.id, error = %e, "Cannot get allocations for node");
                }
            }
        }

        classification
    }

    async fn check_replicas(
        &self,
        long_lived: &BTreeMap<String, Vec<String>>,
    ) -> Vec<(String, ReplicaDrift)> {
        let mut alerted = Vec::new();

        for (job_id, allocations) in long_lived {
            let job = match self.orchestrator.get_job(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(job = %job_id, error = %e, "Cannot get job info from Nomad");
                    continue;
                }
            };
            if job.task_groups.is_empty() || job.is_system() {
                continue;
            }

            let observed = allocations.len() as u64;
            let Some(drift) = replica_drift(job.expected_count(), observed) else {
                continue;
            };

            let (flag, message) = match drift {
                ReplicaDrift::Orphaned(n) => (
                    keys::ORPHANED_ALERT_ENABLED,
                    format!("Job : {job_id} has {n} orphaned allocations"),
                ),
                ReplicaDrift::Queued(n) => (
                    keys::QUEUED_ALERT_ENABLED,
                    format!("Job : {job_id} has {n} queued instances"),
                ),
            };
            info!(job = %job_id, expected = job.expected_count(), observed, "{message}");

            if !flag_present(&job.meta, flag) {
                continue;
            }

            let routing_key = meta_value(&job.meta, keys::PD_SERVICE_KEY).to_string();
            let event = AlertEvent::trigger(IncidentTag::Service, job_id, routing_key, message);
            self.dispatcher.dispatch(event).await;
            alerted.push((job_id.clone(), drift));
        }

        alerted
    }

    async fn check_restart_loops(&self) -> Vec<(String, Vec<String>)> {
        let mut looping: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in self.window.saturated() {
            looping
                .entry(key.job_id.clone())
                .or_default()
                .push(key.allocation_id.clone());
        }

        let mut alerted = Vec::new();
        for (job_id, mut allocations) in looping {
            allocations.sort();

            let job = match self.orchestrator.get_job(&job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(job = %job_id, error = %e, "Cannot get job info from Nomad");
                    continue;
                }
            };
            if !flag_enabled(&job.meta, keys::RESTART_LOOP_ALERT_ENABLED) {
                debug!(job = %job_id, "Restart-loop alerting not enabled");
                continue;
            }

            let message = format!(
                "[Restart-Loop {}] Job = {} has following allocations in restart loop : {}",
                self.labels,
                job_id,
                allocations.join(" ")
            );
            info!(job = %job_id, message = %message, "Triggering restart-loop alert");

            let routing_key = meta_value(&job.meta, keys::PD_SERVICE_KEY).to_string();
            let event =
                AlertEvent::trigger(IncidentTag::RestartLoop, &job_id, routing_key, message);
            self.dispatcher.dispatch(event).await;
            alerted.push((job_id, allocations));
        }

        alerted
    }
}
