//! In-memory fakes of the upstream APIs and the delivery channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_notify::{AlertAction, AlertChannel, AlertEvent, ChannelError};

use crate::consul::{BlockingResult, HealthCheck, ServiceMesh, STATUS_CRITICAL};
use crate::error::{ClientError, ClientResult};
use crate::metadata::JobMetadata;
use crate::nomad::{
    Allocation, AllocationJob, Job, JobSummary, NodeSummary, Orchestrator, PeriodicConfig,
    Service, Task, TaskGroup,
};

fn unavailable(endpoint: &str) -> ClientError {
    ClientError::Status {
        endpoint: endpoint.to_string(),
        status: 500,
        body: "fake failure".to_string(),
    }
}

pub fn meta_map(pairs: &[(&str, &str)]) -> JobMetadata {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Start building a job.
pub fn job(id: &str, job_type: &str) -> JobBuilder {
    JobBuilder {
        job: Job {
            id: id.to_string(),
            name: id.to_string(),
            job_type: job_type.to_string(),
            ..Job::default()
        },
    }
}

pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// Add a task group with `count` instances.
    pub fn group(mut self, count: u32) -> Self {
        let name = format!("group-{}", self.job.task_groups.len());
        self.job.task_groups.push(TaskGroup {
            name,
            count: Some(count),
            tasks: vec![Task {
                name: "app".to_string(),
                services: vec![],
            }],
        });
        self
    }

    /// Register a service on the first task, creating a group if needed.
    pub fn service(mut self, name: &str) -> Self {
        if self.job.task_groups.is_empty() {
            self = self.group(1);
        }
        if let Some(task) = self
            .job
            .task_groups
            .first_mut()
            .and_then(|group| group.tasks.first_mut())
        {
            task.services.push(Service {
                name: name.to_string(),
            });
        }
        self
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.job.meta.insert(key.to_string(), value.to_string());
        self
    }

    pub fn periodic(mut self) -> Self {
        self.job.periodic = Some(PeriodicConfig {
            enabled: Some(true),
            spec: Some("*/5 * * * *".to_string()),
        });
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl From<JobBuilder> for Job {
    fn from(builder: JobBuilder) -> Self {
        builder.build()
    }
}

/// An allocation created at `created`.
pub fn allocation(
    id: &str,
    job_id: &str,
    job_type: &str,
    status: &str,
    created: DateTime<Utc>,
) -> Allocation {
    Allocation {
        id: id.to_string(),
        job_id: job_id.to_string(),
        client_status: status.to_string(),
        create_time: created.timestamp_nanos_opt().unwrap_or_default(),
        job: Some(AllocationJob {
            job_type: job_type.to_string(),
        }),
    }
}

#[derive(Default)]
struct OrchestratorState {
    jobs: Vec<Job>,
    failing_jobs: HashSet<String>,
    fail_listing: bool,
    nodes: Vec<String>,
    allocations: HashMap<String, Vec<Allocation>>,
    failing_nodes: HashSet<String>,
    fail_nodes: bool,
}

/// Scripted [`Orchestrator`].
#[derive(Default)]
pub struct FakeOrchestrator {
    state: Mutex<OrchestratorState>,
}

impl FakeOrchestrator {
    pub fn add_job(&self, job: impl Into<Job>) {
        self.state.lock().unwrap().jobs.push(job.into());
    }

    pub fn fail_job(&self, job_id: &str) {
        self.state.lock().unwrap().failing_jobs.insert(job_id.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn add_node(&self, node_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.nodes.push(node_id.to_string());
        state.allocations.entry(node_id.to_string()).or_default();
    }

    pub fn fail_node(&self, node_id: &str) {
        self.state.lock().unwrap().failing_nodes.insert(node_id.to_string());
    }

    pub fn fail_nodes(&self, fail: bool) {
        self.state.lock().unwrap().fail_nodes = fail;
    }

    /// Replace the allocations reported for `node_id`.
    pub fn set_allocations(&self, node_id: &str, allocations: Vec<Allocation>) {
        self.state
            .lock()
            .unwrap()
            .allocations
            .insert(node_id.to_string(), allocations);
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_jobs(&self) -> ClientResult<Vec<JobSummary>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(unavailable("/v1/jobs"));
        }
        Ok(state
            .jobs
            .iter()
            .map(|job| JobSummary {
                id: job.id.clone(),
                name: job.name.clone(),
                job_type: job.job_type.clone(),
                status: "running".to_string(),
            })
            .collect())
    }

    async fn get_job(&self, job_id: &str) -> ClientResult<Job> {
        let state = self.state.lock().unwrap();
        if state.failing_jobs.contains(job_id) {
            return Err(unavailable("/v1/job"));
        }
        state
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
            .ok_or_else(|| ClientError::Status {
                endpoint: "/v1/job".to_string(),
                status: 404,
                body: "job not found".to_string(),
            })
    }

    async fn list_nodes(&self) -> ClientResult<Vec<NodeSummary>> {
        let state = self.state.lock().unwrap();
        if state.fail_nodes {
            return Err(unavailable("/v1/nodes"));
        }
        Ok(state
            .nodes
            .iter()
            .map(|id| NodeSummary {
                id: id.clone(),
                name: id.clone(),
                status: "ready".to_string(),
            })
            .collect())
    }

    async fn list_allocations(&self, node_id: &str) -> ClientResult<Vec<Allocation>> {
        let state = self.state.lock().unwrap();
        if state.failing_nodes.contains(node_id) {
            return Err(unavailable("/v1/node/allocations"));
        }
        Ok(state.allocations.get(node_id).cloned().unwrap_or_default())
    }
}

/// A critical check for `service` as returned by the blocking query.
pub fn critical_check(service: &str) -> HealthCheck {
    HealthCheck {
        status: STATUS_CRITICAL.to_string(),
        service_name: service.to_string(),
        ..HealthCheck::default()
    }
}

/// A per-service check with an explicit status and service ID.
pub fn service_check(status: &str, service_id: &str) -> HealthCheck {
    HealthCheck {
        status: status.to_string(),
        service_id: service_id.to_string(),
        ..HealthCheck::default()
    }
}

#[derive(Default)]
struct MeshState {
    critical: VecDeque<BlockingResult>,
    fail_critical: bool,
    wait_indexes: Vec<u64>,
    service_checks: HashMap<String, Vec<HealthCheck>>,
}

/// Scripted [`ServiceMesh`].
///
/// Blocking queries pop queued results; an empty queue answers with no
/// critical checks at the last requested index.
#[derive(Default)]
pub struct FakeMesh {
    state: Mutex<MeshState>,
}

impl FakeMesh {
    pub fn push_critical(&self, checks: Vec<HealthCheck>, index: u64) {
        self.state
            .lock()
            .unwrap()
            .critical
            .push_back(BlockingResult { checks, index });
    }

    pub fn fail_critical(&self, fail: bool) {
        self.state.lock().unwrap().fail_critical = fail;
    }

    pub fn set_service_checks(&self, service: &str, checks: Vec<HealthCheck>) {
        self.state
            .lock()
            .unwrap()
            .service_checks
            .insert(service.to_string(), checks);
    }

    /// Index passed to the most recent blocking query.
    pub fn last_wait_index(&self) -> Option<u64> {
        self.state.lock().unwrap().wait_indexes.last().copied()
    }
}

#[async_trait]
impl ServiceMesh for FakeMesh {
    async fn critical_checks(
        &self,
        wait_index: u64,
        _wait: Duration,
    ) -> ClientResult<BlockingResult> {
        let mut state = self.state.lock().unwrap();
        state.wait_indexes.push(wait_index);
        if state.fail_critical {
            return Err(unavailable("/v1/health/state/critical"));
        }
        Ok(state.critical.pop_front().unwrap_or(BlockingResult {
            checks: vec![],
            index: wait_index,
        }))
    }

    async fn service_checks(&self, service: &str) -> ClientResult<Vec<HealthCheck>> {
        let state = self.state.lock().unwrap();
        Ok(state.service_checks.get(service).cloned().unwrap_or_default())
    }
}

/// Delivery channel that records every event it is handed.
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<AlertEvent>>,
    fail: Mutex<bool>,
}

impl RecordingChannel {
    /// Events handed to the channel, including ones it failed to deliver.
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn triggers(&self) -> Vec<AlertEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.action == AlertAction::Trigger)
            .collect()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), ChannelError> {
        self.events.lock().unwrap().push(event.clone());
        if *self.fail.lock().unwrap() {
            Err(ChannelError::Other("delivery refused".to_string()))
        } else {
            Ok(())
        }
    }
}
