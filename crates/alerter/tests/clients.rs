use serde_json::json;
use service_alerter::consul::{ConsulClient, ServiceMesh};
use service_alerter::error::ClientError;
use service_alerter::nomad::{NomadClient, Orchestrator};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn nomad_lists_jobs_with_stale_reads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/jobs"))
        .and(query_param("stale", ""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ID": "web", "Name": "web", "Type": "service", "Status": "running"},
            {"ID": "agent", "Name": "agent", "Type": "system", "Status": "running"},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = NomadClient::new(&server.uri(), TIMEOUT).unwrap();
    let jobs = client.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].job_type, "system");
}

#[tokio::test]
async fn nomad_encodes_periodic_child_job_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/job/backup%2Fperiodic-1700000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ID": "backup/periodic-1700000000",
            "Type": "batch",
            "TaskGroups": null,
            "Meta": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = NomadClient::new(&server.uri(), TIMEOUT).unwrap();
    let job = client.get_job("backup/periodic-1700000000").await.unwrap();
    assert!(job.is_batch());
    assert!(job.task_groups.is_empty());
}

#[tokio::test]
async fn nomad_lists_node_allocations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ID": "node-1", "Name": "worker-1", "Status": "ready"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/node/node-1/allocations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "ID": "alloc-1",
                "JobID": "web",
                "ClientStatus": "pending",
                "CreateTime": 1_700_000_000_000_000_000_i64,
                "Job": {"Type": "service"},
            },
        ])))
        .mount(&server)
        .await;

    let client = NomadClient::new(&server.uri(), TIMEOUT).unwrap();
    let nodes = client.list_nodes().await.unwrap();
    let allocations = client.list_allocations(&nodes[0].id).await.unwrap();
    assert_eq!(allocations[0].client_status, "pending");
    assert_eq!(allocations[0].job_type(), "service");
}

#[tokio::test]
async fn nomad_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/job/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("job not found"))
        .mount(&server)
        .await;

    let client = NomadClient::new(&server.uri(), TIMEOUT).unwrap();
    let err = client.get_job("missing").await.unwrap_err();
    match err {
        ClientError::Status { status, body, .. } => {
            assert_eq!(status, 404);
            assert_eq!(body, "job not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn nomad_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = NomadClient::new(&server.uri(), TIMEOUT).unwrap();
    assert!(matches!(
        client.list_nodes().await,
        Err(ClientError::Decode { .. })
    ));
}

#[tokio::test]
async fn consul_blocking_query_reads_index_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/state/critical"))
        .and(query_param("index", "41"))
        .and(query_param("wait", "60s"))
        .and(query_param("dc", "dc1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "42")
                .set_body_json(json!([
                    {
                        "Node": "node-1",
                        "CheckID": "service:web",
                        "Name": "http",
                        "Status": "critical",
                        "ServiceID": "_nomad-executor-0f3c9a1e-aaaa-bbbb-cccc-123456789abc-web-http",
                        "ServiceName": "web",
                        "ServiceTags": null,
                    },
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ConsulClient::new(&server.uri(), Some("dc1".to_string()), TIMEOUT).unwrap();
    let result = client
        .critical_checks(41, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(result.index, 42);
    assert_eq!(result.checks.len(), 1);
    assert_eq!(result.checks[0].service_name, "web");
}

#[tokio::test]
async fn consul_missing_index_header_restarts_watch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/state/critical"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = ConsulClient::new(&server.uri(), None, TIMEOUT).unwrap();
    let result = client
        .critical_checks(7, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(result.index, 0);
    assert!(result.checks.is_empty());
}

#[tokio::test]
async fn consul_service_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/checks/web"))
        .and(query_param("stale", ""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Status": "critical", "ServiceID": "_nomad-executor-0f3c9a1e-x", "ServiceName": "web"},
            {"Status": "passing", "ServiceID": "_nomad-executor-77aa11bb-y", "ServiceName": "web"},
        ])))
        .mount(&server)
        .await;

    let client = ConsulClient::new(&server.uri(), None, TIMEOUT).unwrap();
    let checks = client.service_checks("web").await.unwrap();
    assert_eq!(checks.len(), 2);
    assert!(!checks[0].is_passing());
    assert!(checks[1].is_passing());
}
