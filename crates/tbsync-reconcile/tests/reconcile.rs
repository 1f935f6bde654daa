//! End-to-end reconciliation tests against a wiremock platform stand-in.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tbsync_client::{ApiClient, RequestError};
use tbsync_core::config::{BootstrapConfig, DesiredDevice, KafkaConfig, PlatformConfig, RuleChainConfig};
use tbsync_core::{NodeIndex, ReconcileEvent, RuleChainMetadata, SessionToken, WriteEndpoint};
use tbsync_reconcile::rule_chain::kafka_sink_configuration;
use tbsync_reconcile::{ensure_entity, ensure_sink_and_edge, run_bootstrap, ReconcileError, RunOptions};

const SWITCH: &str = "org.thingsboard.rule.engine.filter.TbMsgTypeSwitchNode";
const KAFKA: &str = "org.thingsboard.rule.engine.kafka.TbKafkaNode";

fn platform(server: &MockServer) -> PlatformConfig {
    PlatformConfig {
        url: server.uri(),
        request_timeout_secs: 5,
        ready_timeout_secs: 0,
        ready_poll_secs: 0,
        ..Default::default()
    }
}

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&platform(server)).unwrap()
}

fn token() -> SessionToken {
    SessionToken::new("tok")
}

fn device_json(id: &str, name: &str) -> Value {
    json!({"id": {"entityType": "DEVICE", "id": id}, "name": name, "type": "drone"})
}

fn root_metadata() -> Value {
    json!({
        "ruleChainId": {"entityType": "RULE_CHAIN", "id": "chain-1"},
        "firstNodeIndex": 0,
        "nodes": [
            {"id": {"entityType": "RULE_NODE", "id": "n0"}, "type": "org.thingsboard.rule.engine.profile.TbDeviceProfileNode", "name": "Device Profile Node", "configuration": {}},
            {"id": {"entityType": "RULE_NODE", "id": "n1"}, "type": "org.thingsboard.rule.engine.telemetry.TbMsgTimeseriesNode", "name": "Save Timeseries", "configuration": {}},
            {"id": {"entityType": "RULE_NODE", "id": "n2"}, "type": SWITCH, "name": "Message Type Switch", "configuration": {}}
        ],
        "connections": [
            {"fromIndex": 0, "toIndex": 2, "type": "Success"},
            {"fromIndex": 2, "toIndex": 1, "type": "Post telemetry"}
        ],
        "ruleChainConnections": null
    })
}

async fn mount_root_chain_search(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/ruleChains"))
        .and(query_param("textSearch", "Root Rule Chain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": {"entityType": "RULE_CHAIN", "id": "chain-v2"}, "name": "Root Rule Chain v2"},
                {"id": {"entityType": "RULE_CHAIN", "id": "chain-1"}, "name": "Root Rule Chain", "root": true}
            ],
            "hasNext": false
        })))
        .mount(server)
        .await;
}

async fn mount_metadata(server: &MockServer, metadata: Value) {
    Mock::given(method("GET"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
        .mount(server)
        .await;
}

async fn posted_metadata(server: &MockServer, endpoint: &str) -> Vec<RuleChainMetadata> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == endpoint)
        .map(|r| r.body_json::<RuleChainMetadata>().unwrap())
        .collect()
}

fn sink_config() -> Value {
    kafka_sink_configuration(&KafkaConfig::default())
}

// ── Devices ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_device_is_created_then_credentialed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [device_json("d10", "drone-10")],
            "hasNext": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device"))
        .and(body_partial_json(json!({"name": "drone-1", "type": "drone"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json("d1", "drone-1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/device/d1/credentials"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device/credentials"))
        .and(body_partial_json(json!({
            "credentialsType": "ACCESS_TOKEN",
            "credentialsId": "secret-1",
            "deviceId": {"entityType": "DEVICE", "id": "d1"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = ensure_entity(&client, &token(), "drone-1", "secret-1", "drone")
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.device.id.id, "d1");
    assert!(outcome.credentials.id.is_none());
    assert!(matches!(
        outcome.events.as_slice(),
        [ReconcileEvent::DeviceCreated { .. }, ReconcileEvent::CredentialsSaved { reused_record: false, .. }]
    ));
}

#[tokio::test]
async fn test_existing_device_is_idempotent_and_reuses_credential_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [device_json("d1", "drone-1")],
            "hasNext": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json("dup", "drone-1")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/device/d1/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": {"id": "cred-1"},
            "createdTime": 1700000000000u64,
            "deviceId": {"entityType": "DEVICE", "id": "d1"},
            "credentialsType": "ACCESS_TOKEN",
            "credentialsId": "old-token",
            "credentialsValue": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device/credentials"))
        .and(body_partial_json(json!({
            "id": {"id": "cred-1"},
            "credentialsId": "secret-1",
            "deviceId": {"entityType": "DEVICE", "id": "d1"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    for _ in 0..2 {
        let outcome = ensure_entity(&client, &token(), "drone-1", "secret-1", "drone")
            .await
            .unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.credentials.credentials_id, "secret-1");
        assert_eq!(
            outcome.credentials.id.as_ref().map(|id| id.id.as_str()),
            Some("cred-1")
        );
    }
}

#[tokio::test]
async fn test_empty_credential_record_takes_create_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [device_json("d1", "drone-1")],
            "hasNext": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/device/d1/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device/credentials"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = ensure_entity(&client, &token(), "drone-1", "secret-1", "drone")
        .await
        .unwrap();
    assert!(outcome.credentials.id.is_none());

    let saved: Vec<Value> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/api/device/credentials")
        .map(|r| r.body_json::<Value>().unwrap())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].get("id").is_none());
    assert_eq!(saved[0]["credentialsId"], "secret-1");
}

#[tokio::test]
async fn test_device_request_failure_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = ensure_entity(&client, &token(), "drone-1", "s", "drone")
        .await
        .unwrap_err();
    match err {
        ReconcileError::Request(RequestError::Status { status, detail, .. }) => {
            assert_eq!(status, 401);
            assert_eq!(detail, "token expired");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ── Rule chain ───────────────────────────────────────────────────

#[tokio::test]
async fn test_sink_and_edge_installed_via_primary_endpoint() {
    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, root_metadata()).await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap();

    assert_eq!(outcome.chain.id.id, "chain-1");
    assert_eq!(outcome.dispatch_index, NodeIndex(2));
    assert_eq!(outcome.sink_index, NodeIndex(3));
    assert_eq!(outcome.written_via, Some(WriteEndpoint::Primary));

    let written = posted_metadata(&server, "/api/ruleChain/chain-1/metadata").await;
    assert_eq!(written.len(), 1);
    let doc = &written[0];
    assert_eq!(doc.nodes.len(), 4);
    assert_eq!(doc.nodes[3].node_type, KAFKA);
    assert_eq!(doc.nodes[2].node_type, SWITCH);
    assert_eq!(doc.connections.len(), 3);
    assert!(doc.connections[0].links(NodeIndex(0), NodeIndex(2), "Success"));
    assert!(doc.connections[1].links(NodeIndex(2), NodeIndex(1), "Post telemetry"));
    assert!(doc.connections[2].links(NodeIndex(2), NodeIndex(3), "Post telemetry"));
    assert_eq!(doc.extra["firstNodeIndex"], json!(0));
}

#[tokio::test]
async fn test_already_reconciled_chain_is_not_written() {
    let mut metadata = root_metadata();
    metadata["nodes"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": {"entityType": "RULE_NODE", "id": "k"}, "type": KAFKA, "name": "Kafka sink", "configuration": {}}));
    metadata["connections"]
        .as_array_mut()
        .unwrap()
        .push(json!({"fromIndex": 2, "toIndex": 3, "type": "Post telemetry"}));

    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, metadata).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap();

    assert_eq!(outcome.written_via, None);
    assert_eq!(outcome.sink_index, NodeIndex(3));
    assert!(matches!(
        outcome.events.as_slice(),
        [ReconcileEvent::GraphUnchanged { .. }]
    ));
}

#[tokio::test]
async fn test_missing_dispatch_node_fails_before_write() {
    let mut metadata = root_metadata();
    metadata["nodes"].as_array_mut().unwrap().truncate(2);
    metadata["connections"] = json!([]);

    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, metadata).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Precondition(_)));
}

#[tokio::test]
async fn test_missing_chain_is_precondition_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ruleChains"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": {"entityType": "RULE_CHAIN", "id": "x"}, "name": "Root Rule Chain v2"}],
            "hasNext": false
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Root Rule Chain not found"));
}

#[tokio::test]
async fn test_failed_primary_write_falls_back_to_legacy_endpoint() {
    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, root_metadata()).await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such endpoint"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/metadata"))
        .and(body_partial_json(json!({"ruleChainId": {"entityType": "RULE_CHAIN", "id": "chain-1"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap();
    assert_eq!(outcome.written_via, Some(WriteEndpoint::Legacy));

    let primary = posted_metadata(&server, "/api/ruleChain/chain-1/metadata").await;
    let legacy = posted_metadata(&server, "/api/ruleChain/metadata").await;
    assert_eq!(primary, legacy, "both endpoints receive the same document");
}

#[tokio::test]
async fn test_primary_write_timeout_falls_back_to_legacy_endpoint() {
    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, root_metadata()).await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/metadata"))
        .and(body_partial_json(json!({"ruleChainId": {"entityType": "RULE_CHAIN", "id": "chain-1"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = PlatformConfig {
        request_timeout_secs: 1,
        ..platform(&server)
    };
    let client = ApiClient::new(&config).unwrap();
    let outcome = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap();
    assert_eq!(outcome.written_via, Some(WriteEndpoint::Legacy));
    assert_eq!(posted_metadata(&server, "/api/ruleChain/metadata").await.len(), 1);
}

#[tokio::test]
async fn test_both_write_endpoints_failing_propagates() {
    let server = MockServer::start().await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, root_metadata()).await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .respond_with(ResponseTemplate::new(500).set_body_string("primary down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/metadata"))
        .respond_with(ResponseTemplate::new(500).set_body_string("legacy down"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = ensure_sink_and_edge(&client, &token(), &RuleChainConfig::default(), &sink_config())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("legacy down"));
}

// ── Full run ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_bootstrap_reports_events_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [device_json("d1", "drone-1")],
            "hasNext": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/device/d1/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": {"id": "cred-1"},
            "deviceId": {"entityType": "DEVICE", "id": "d1"},
            "credentialsType": "ACCESS_TOKEN",
            "credentialsId": "old"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/device/credentials"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_root_chain_search(&server).await;
    mount_metadata(&server, root_metadata()).await;
    Mock::given(method("POST"))
        .and(path("/api/ruleChain/chain-1/metadata"))
        .and(body_partial_json(json!({
            "nodes": [{}, {}, {}, {"configuration": {"topic": "fleet", "bootstrapServers": "kafka-0:9092"}}]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = BootstrapConfig {
        platform: platform(&server),
        kafka: KafkaConfig {
            bootstrap_servers: "kafka-0:9092".to_string(),
            topic: "fleet".to_string(),
        },
        devices: vec![DesiredDevice {
            name: "drone-1".to_string(),
            token: "secret-1".to_string(),
        }],
        ..Default::default()
    };

    let mut seen = Vec::new();
    let report = run_bootstrap(&config, RunOptions::default(), |event| {
        seen.push(event.to_string())
    })
    .await
    .unwrap();

    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.chain.name, "Root Rule Chain");
    assert_eq!(
        seen,
        vec![
            "[+] Authenticated as tenant@thingsboard.org".to_string(),
            "[+] Ensured device drone-1 with token secret-1".to_string(),
            "[+] Added sink node to Root Rule Chain".to_string(),
            "[+] Linked node 2 to sink 3 for Post telemetry in Root Rule Chain".to_string(),
            "[+] Root Rule Chain updated with sink forwarding".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_run_bootstrap_rejects_invalid_config_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = BootstrapConfig {
        platform: platform(&server),
        devices: vec![
            DesiredDevice {
                name: "drone-1".to_string(),
                token: "a".to_string(),
            },
            DesiredDevice {
                name: "drone-1".to_string(),
                token: "b".to_string(),
            },
        ],
        ..Default::default()
    };

    let err = run_bootstrap(&config, RunOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Config(_)));
}
