//! Consul service-mesh client.
//!
//! The critical-state query is a Consul blocking query: the request parks on
//! the server until the result changes past `index` or `wait` elapses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::error::ClientResult;
use crate::http::{endpoint, get_json, null_as_default, parse_base};

/// Check status reported by a healthy check.
pub const STATUS_PASSING: &str = "passing";
/// Check status reported by a failing check.
pub const STATUS_CRITICAL: &str = "critical";

/// Header carrying the blocking-query index.
const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

/// Extra slack on top of the blocking wait so the HTTP timeout never fires
/// before Consul returns. Consul adds up to `wait / 16` of jitter.
const BLOCKING_SLACK: Duration = Duration::from_secs(15);

/// One health check as returned by the `/v1/health/*` endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub node: String,
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_tags: Vec<String>,
}

impl HealthCheck {
    pub fn is_passing(&self) -> bool {
        self.status == STATUS_PASSING
    }
}

/// Result of a blocking query.
#[derive(Debug, Clone, Default)]
pub struct BlockingResult {
    pub checks: Vec<HealthCheck>,
    /// Index to pass to the next query
    pub index: u64,
}

/// Read-only view of the service mesh used by the health engine.
#[async_trait]
pub trait ServiceMesh: Send + Sync {
    /// Block until the set of critical checks changes past `wait_index`
    /// or `wait` elapses.
    async fn critical_checks(
        &self,
        wait_index: u64,
        wait: Duration,
    ) -> ClientResult<BlockingResult>;

    /// All checks registered for a service, in any state.
    async fn service_checks(&self, service: &str) -> ClientResult<Vec<HealthCheck>>;
}

/// HTTP client for the Consul API.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    base_url: Url,
    datacenter: Option<String>,
    client: reqwest::Client,
}

impl ConsulClient {
    /// Create a client for the Consul agent at `addr`.
    ///
    /// `timeout` bounds ordinary requests; blocking queries get their own
    /// per-request timeout derived from the wait time.
    pub fn new(addr: &str, datacenter: Option<String>, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: parse_base(addr)?,
            datacenter: datacenter.filter(|dc| !dc.is_empty()),
            client,
        })
    }

    fn request(&self, url: &Url) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url.clone()).query(&[("stale", "")]);
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }
}

#[async_trait]
impl ServiceMesh for ConsulClient {
    async fn critical_checks(
        &self,
        wait_index: u64,
        wait: Duration,
    ) -> ClientResult<BlockingResult> {
        let url = endpoint(&self.base_url, &["v1", "health", "state", STATUS_CRITICAL])?;
        let request = self
            .request(&url)
            .query(&[
                ("index", wait_index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .timeout(wait + BLOCKING_SLACK);

        let (checks, headers) = get_json::<Vec<HealthCheck>>(request, &url).await?;
        let index = headers
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(BlockingResult { checks, index })
    }

    async fn service_checks(&self, service: &str) -> ClientResult<Vec<HealthCheck>> {
        let url = endpoint(&self.base_url, &["v1", "health", "checks", service])?;
        let (checks, _) = get_json(self.request(&url), &url).await?;
        Ok(checks)
    }
}

/// Compute the index for the next blocking query.
///
/// Consul documents that an index can go backwards (snapshot restore,
/// leader change); when it does the watch must restart from zero.
pub fn next_wait_index(current: u64, returned: u64) -> u64 {
    if returned < current {
        0
    } else {
        returned
    }
}
