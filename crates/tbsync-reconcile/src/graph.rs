//! In-memory, append-only view of a rule chain's graph document.
//!
//! Connections refer to nodes by their position in the node sequence. A
//! position keeps naming the same node only while nothing is inserted ahead
//! of it, removed, or reordered. [`RuleGraph`] therefore offers exactly one
//! node mutation, [`RuleGraph::append_node`], and every [`NodeIndex`] handed
//! out before an append names the same node after it. Existing connections
//! are never rewritten.

use serde_json::{Map, Value};

use tbsync_core::{NodeConnection, NodeIndex, RuleChainMetadata, RuleNode};

use crate::error::{ReconcileError, Result};

/// A rule chain document opened for reconciliation.
#[derive(Debug, Clone)]
pub struct RuleGraph {
    nodes: Vec<RuleNode>,
    connections: Vec<NodeConnection>,
    /// Document fields outside nodes/connections, echoed back unchanged.
    extra: Map<String, Value>,
    modified: bool,
}

impl RuleGraph {
    pub fn from_metadata(metadata: RuleChainMetadata) -> Self {
        Self {
            nodes: metadata.nodes,
            connections: metadata.connections,
            extra: metadata.extra,
            modified: false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&RuleNode> {
        self.nodes.get(index.0)
    }

    pub fn connections(&self) -> &[NodeConnection] {
        &self.connections
    }

    /// First node, in sequence order, satisfying `predicate`.
    pub fn find_node(&self, predicate: impl Fn(&RuleNode) -> bool) -> Option<NodeIndex> {
        self.nodes.iter().position(predicate).map(NodeIndex)
    }

    /// First node whose type equals `node_type`.
    pub fn find_node_by_type(&self, node_type: &str) -> Option<NodeIndex> {
        self.find_node(|node| node.node_type == node_type)
    }

    /// First node whose type contains `fragment`.
    pub fn find_node_by_type_containing(&self, fragment: &str) -> Option<NodeIndex> {
        self.find_node(|node| node.node_type.contains(fragment))
    }

    /// Append a node at the end of the sequence and return its position.
    pub fn append_node(&mut self, node: RuleNode) -> NodeIndex {
        self.nodes.push(node);
        self.modified = true;
        NodeIndex(self.nodes.len() - 1)
    }

    pub fn has_connection(&self, from: NodeIndex, to: NodeIndex, label: &str) -> bool {
        self.connections.iter().any(|c| c.links(from, to, label))
    }

    /// Append the connection `from -[label]-> to` unless it already exists.
    ///
    /// Returns whether a connection was added.
    pub fn ensure_connection(&mut self, from: NodeIndex, to: NodeIndex, label: &str) -> Result<bool> {
        for index in [from, to] {
            if index.0 >= self.nodes.len() {
                return Err(ReconcileError::DanglingConnection {
                    index,
                    node_count: self.nodes.len(),
                });
            }
        }

        if self.has_connection(from, to, label) {
            return Ok(false);
        }
        self.connections.push(NodeConnection::new(from, to, label));
        self.modified = true;
        Ok(true)
    }

    /// Whether any node or connection was appended since the document was opened.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn into_metadata(self) -> RuleChainMetadata {
        RuleChainMetadata {
            nodes: self.nodes,
            connections: self.connections,
            extra: self.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: &str, name: &str) -> RuleNode {
        RuleNode {
            id: None,
            node_type: node_type.to_string(),
            name: name.to_string(),
            configuration: Value::Null,
            extra: Map::new(),
        }
    }

    fn sample() -> RuleGraph {
        RuleGraph::from_metadata(RuleChainMetadata {
            nodes: vec![
                node("org.x.TbDeviceProfileNode", "profile"),
                node("org.x.TbMsgTypeSwitchNode", "switch"),
                node("org.x.TbMsgTimeseriesNode", "save ts"),
            ],
            connections: vec![
                NodeConnection::new(NodeIndex(0), NodeIndex(1), "Success"),
                NodeConnection::new(NodeIndex(1), NodeIndex(2), "Post telemetry"),
            ],
            extra: Map::new(),
        })
    }

    #[test]
    fn test_find_first_match_in_sequence_order() {
        let mut graph = sample();
        graph.append_node(node("org.x.TbMsgTypeSwitchNode", "switch 2"));

        assert_eq!(graph.find_node_by_type_containing("TbMsgTypeSwitchNode"), Some(NodeIndex(1)));
        assert_eq!(graph.find_node_by_type("org.x.TbMsgTimeseriesNode"), Some(NodeIndex(2)));
        assert_eq!(graph.find_node_by_type("TbMsgTimeseriesNode"), None);
    }

    #[test]
    fn test_append_keeps_existing_positions() {
        let mut graph = sample();
        let before = graph.connections().to_vec();

        let added = graph.append_node(node("org.x.TbKafkaNode", "kafka"));
        assert_eq!(added, NodeIndex(3));
        assert_eq!(graph.node(NodeIndex(1)).map(|n| n.name.as_str()), Some("switch"));
        assert_eq!(graph.connections(), before.as_slice());
        assert!(graph.is_modified());
    }

    #[test]
    fn test_ensure_connection_is_idempotent() {
        let mut graph = sample();
        assert!(!graph.is_modified());

        assert!(!graph.ensure_connection(NodeIndex(1), NodeIndex(2), "Post telemetry").unwrap());
        assert!(!graph.is_modified());

        assert!(graph.ensure_connection(NodeIndex(1), NodeIndex(0), "Other").unwrap());
        assert!(!graph.ensure_connection(NodeIndex(1), NodeIndex(0), "Other").unwrap());
        assert_eq!(graph.connections().len(), 3);
    }

    #[test]
    fn test_ensure_connection_rejects_dangling_index() {
        let mut graph = sample();
        let err = graph
            .ensure_connection(NodeIndex(1), NodeIndex(9), "Post telemetry")
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DanglingConnection { index: NodeIndex(9), node_count: 3 }
        ));
        assert_eq!(graph.connections().len(), 2);
    }
}
