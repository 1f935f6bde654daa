//! Rule chain reconciliation: install a sink node and route telemetry to it.
//!
//! The chain's metadata is read, patched in memory through [`RuleGraph`],
//! and written back wholesale. Nothing outside the sink node and its one
//! incoming edge is touched, and nothing is ever removed.

use chrono::Utc;
use serde_json::{json, Map, Value};

use tbsync_client::ApiClient;
use tbsync_core::config::{KafkaConfig, RuleChainConfig};
use tbsync_core::types::{ENTITY_RULE_CHAIN, ENTITY_RULE_NODE};
use tbsync_core::{
    EntityRef, NodeIndex, ReconcileEvent, RuleChain, RuleChainMetadata, RuleNode, SessionToken,
    WriteEndpoint,
};

use crate::error::{ReconcileError, Result};
use crate::graph::RuleGraph;

/// Canvas position of a newly installed sink node.
const SINK_LAYOUT: (i64, i64) = (1000, 320);

/// Result of reconciling the rule chain.
#[derive(Debug, Clone)]
pub struct GraphOutcome {
    pub chain: RuleChain,
    /// The document as it stands on the platform after this call.
    pub metadata: RuleChainMetadata,
    pub dispatch_index: NodeIndex,
    pub sink_index: NodeIndex,
    /// `None` when the document was already in the desired shape.
    pub written_via: Option<WriteEndpoint>,
    pub events: Vec<ReconcileEvent>,
}

/// Where the sink sits in a patched graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkPlacement {
    pub dispatch_index: NodeIndex,
    pub sink_index: NodeIndex,
    pub events: Vec<ReconcileEvent>,
}

/// Ensure the chain named `target.name` forwards `target.route_label` messages
/// from its dispatch node to a sink node of type `target.sink_type`.
///
/// Fails before any write when the chain or its dispatch node is missing.
pub async fn ensure_sink_and_edge(
    client: &ApiClient,
    token: &SessionToken,
    target: &RuleChainConfig,
    sink_configuration: &Value,
) -> Result<GraphOutcome> {
    let chain = client
        .find_rule_chain_by_name(token, &target.name)
        .await?
        .ok_or_else(|| ReconcileError::Precondition(format!("{} not found", target.name)))?;

    let metadata = client.get_rule_chain_metadata(token, &chain.id).await?;
    tracing::debug!(
        chain = %chain.name,
        chain_id = %chain.id,
        nodes = metadata.nodes.len(),
        connections = metadata.connections.len(),
        "Fetched rule chain metadata"
    );

    let mut graph = RuleGraph::from_metadata(metadata);
    let SinkPlacement {
        dispatch_index,
        sink_index,
        mut events,
    } = place_sink(&mut graph, &chain, target, sink_configuration)?;

    if !graph.is_modified() {
        tracing::info!(chain = %chain.name, "Rule chain already forwards to sink");
        events.push(ReconcileEvent::GraphUnchanged {
            chain: chain.name.clone(),
        });
        return Ok(GraphOutcome {
            chain,
            metadata: graph.into_metadata(),
            dispatch_index,
            sink_index,
            written_via: None,
            events,
        });
    }

    let mut metadata = graph.into_metadata();
    if !metadata.extra.contains_key("ruleChainId") {
        metadata
            .extra
            .insert("ruleChainId".to_string(), serde_json::to_value(&chain.id)?);
    }

    let endpoint = write_metadata(client, token, &chain.id, &metadata).await?;
    tracing::info!(chain = %chain.name, endpoint = ?endpoint, "Rule chain updated");
    events.push(ReconcileEvent::GraphSaved {
        chain: chain.name.clone(),
        endpoint,
    });

    Ok(GraphOutcome {
        chain,
        metadata,
        dispatch_index,
        sink_index,
        written_via: Some(endpoint),
        events,
    })
}

/// Patch `graph` in memory: append the sink node if no node has the sink
/// type, then append the routing edge if it is missing.
///
/// When several nodes match the dispatch or sink type, the first in
/// sequence order is used.
pub fn place_sink(
    graph: &mut RuleGraph,
    chain: &RuleChain,
    target: &RuleChainConfig,
    sink_configuration: &Value,
) -> Result<SinkPlacement> {
    let mut events = Vec::new();

    let dispatch_index = graph
        .find_node_by_type_containing(&target.dispatch_type)
        .ok_or_else(|| {
            ReconcileError::Precondition(format!(
                "no node of type {} in {}",
                target.dispatch_type, chain.name
            ))
        })?;

    let sink_index = match graph.find_node_by_type(&target.sink_type) {
        Some(index) => index,
        None => {
            let index = graph.append_node(sink_node(&chain.id, target, sink_configuration));
            tracing::info!(chain = %chain.name, index = index.0, "Added sink node");
            events.push(ReconcileEvent::SinkNodeAdded {
                chain: chain.name.clone(),
                node_type: target.sink_type.clone(),
                index,
            });
            index
        }
    };

    if graph.ensure_connection(dispatch_index, sink_index, &target.route_label)? {
        tracing::info!(
            chain = %chain.name,
            from = dispatch_index.0,
            to = sink_index.0,
            label = %target.route_label,
            "Linked dispatch node to sink"
        );
        events.push(ReconcileEvent::EdgeLinked {
            chain: chain.name.clone(),
            from: dispatch_index,
            to: sink_index,
            label: target.route_label.clone(),
        });
    }

    Ok(SinkPlacement {
        dispatch_index,
        sink_index,
        events,
    })
}

/// Write the document to the primary endpoint, falling back to the legacy one.
///
/// The fallback fires on any primary failure, transport errors included. The
/// body is a full-document overwrite, so a duplicate submission converges.
async fn write_metadata(
    client: &ApiClient,
    token: &SessionToken,
    chain_id: &EntityRef,
    metadata: &RuleChainMetadata,
) -> Result<WriteEndpoint> {
    match client.save_rule_chain_metadata(token, chain_id, metadata).await {
        Ok(()) => Ok(WriteEndpoint::Primary),
        Err(primary) => {
            tracing::warn!(
                chain_id = %chain_id,
                error = %primary,
                "Primary metadata endpoint failed, retrying legacy endpoint"
            );
            client.save_rule_chain_metadata_legacy(token, metadata).await?;
            Ok(WriteEndpoint::Legacy)
        }
    }
}

/// Configuration of a Kafka producer node publishing to `kafka.topic`.
pub fn kafka_sink_configuration(kafka: &KafkaConfig) -> Value {
    json!({
        "topic": kafka.topic,
        "bootstrapServers": kafka.bootstrap_servers,
        "sync": false,
        "timeout": 3000,
        "retries": 1,
        "acks": "1",
        "batchSize": 16384,
        "linger": 1,
        "maxRequestSize": 1048576,
        "key": "${deviceName}",
        "addMetadata": false,
    })
}

fn sink_node(chain_id: &EntityRef, target: &RuleChainConfig, configuration: &Value) -> RuleNode {
    let mut extra = Map::new();
    extra.insert("createdTime".into(), json!(Utc::now().timestamp_millis()));
    extra.insert(
        "ruleChainId".into(),
        json!({"entityType": ENTITY_RULE_CHAIN, "id": chain_id.id}),
    );
    extra.insert("debugSettings".into(), Value::Null);
    extra.insert("singletonMode".into(), json!(false));
    extra.insert("queueName".into(), Value::Null);
    extra.insert("configurationVersion".into(), json!(0));
    extra.insert("externalId".into(), Value::Null);
    extra.insert(
        "additionalInfo".into(),
        json!({"layoutX": SINK_LAYOUT.0, "layoutY": SINK_LAYOUT.1}),
    );

    RuleNode {
        id: Some(EntityRef::random(ENTITY_RULE_NODE)),
        node_type: target.sink_type.clone(),
        name: target.sink_name.clone(),
        configuration: configuration.clone(),
        extra,
    }
}
