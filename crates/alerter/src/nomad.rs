//! Nomad orchestrator client.
//!
//! Only the read-only endpoints the alert engines need are covered. Every
//! query is issued with `stale` so any server (not just the leader) can
//! answer.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::error::ClientResult;
use crate::http::{endpoint, get_json, null_as_default, parse_base};

/// Job type whose allocations run on every node.
pub const JOB_TYPE_SYSTEM: &str = "system";
/// Job type for run-to-completion work.
pub const JOB_TYPE_BATCH: &str = "batch";

/// Allocation client status: running.
pub const STATUS_RUNNING: &str = "running";
/// Allocation client status: pending.
pub const STATUS_PENDING: &str = "pending";

/// Entry of `GET /v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSummary {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub job_type: String,
    #[serde(default)]
    pub status: String,
}

/// Detail of `GET /v1/job/:id`, trimmed to the fields the engines read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub job_type: String,
    #[serde(default)]
    pub periodic: Option<PeriodicConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: HashMap<String, String>,
}

impl Job {
    /// A job is periodic when it carries a periodic stanza at all.
    pub fn is_periodic(&self) -> bool {
        self.periodic.is_some()
    }

    pub fn is_system(&self) -> bool {
        self.job_type == JOB_TYPE_SYSTEM
    }

    pub fn is_batch(&self) -> bool {
        self.job_type == JOB_TYPE_BATCH
    }

    /// Sum of the declared counts across all task groups.
    pub fn expected_count(&self) -> u64 {
        self.task_groups
            .iter()
            .map(|group| u64::from(group.count.unwrap_or(0)))
            .sum()
    }

    /// Name of the first service of the first task of the first group.
    pub fn primary_service(&self) -> Option<&str> {
        self.task_groups
            .first()?
            .tasks
            .first()?
            .services
            .first()
            .map(|service| service.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeriodicConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub spec: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    pub name: String,
}

/// Entry of `GET /v1/nodes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeSummary {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Entry of `GET /v1/node/:id/allocations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Allocation {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "JobID")]
    pub job_id: String,
    #[serde(default)]
    pub client_status: String,
    /// Creation time in nanoseconds since the Unix epoch
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub job: Option<AllocationJob>,
}

/// The job back-reference embedded in an allocation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocationJob {
    #[serde(rename = "Type", default)]
    pub job_type: String,
}

impl Allocation {
    pub fn job_type(&self) -> &str {
        self.job.as_ref().map_or("", |job| job.job_type.as_str())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.create_time)
    }
}

/// Read-only view of the orchestrator used by the engines.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_jobs(&self) -> ClientResult<Vec<JobSummary>>;

    async fn get_job(&self, job_id: &str) -> ClientResult<Job>;

    async fn list_nodes(&self) -> ClientResult<Vec<NodeSummary>>;

    async fn list_allocations(&self, node_id: &str) -> ClientResult<Vec<Allocation>>;
}

/// HTTP client for the Nomad API.
#[derive(Debug, Clone)]
pub struct NomadClient {
    base_url: Url,
    client: reqwest::Client,
}

impl NomadClient {
    /// Create a client for the Nomad agent at `addr`.
    pub fn new(addr: &str, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: parse_base(addr)?,
            client,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> ClientResult<T> {
        let url = endpoint(&self.base_url, segments)?;
        let request = self.client.get(url.clone()).query(&[("stale", "")]);
        let (value, _) = get_json(request, &url).await?;
        Ok(value)
    }
}

#[async_trait]
impl Orchestrator for NomadClient {
    async fn list_jobs(&self) -> ClientResult<Vec<JobSummary>> {
        self.get(&["v1", "jobs"]).await
    }

    async fn get_job(&self, job_id: &str) -> ClientResult<Job> {
        self.get(&["v1", "job", job_id]).await
    }

    async fn list_nodes(&self) -> ClientResult<Vec<NodeSummary>> {
        self.get(&["v1", "nodes"]).await
    }

    async fn list_allocations(&self, node_id: &str) -> ClientResult<Vec<Allocation>> {
        self.get(&["v1", "node", node_id, "allocations"]).await
    }
}
