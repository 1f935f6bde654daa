//! Wire types for the IoT platform's REST API.
//!
//! Every record keeps the fields tbsync reasons about as typed members and
//! carries everything else the platform sent in a flattened `extra` map, so
//! a read-modify-write cycle echoes back fields this crate does not model.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Session ───────────────────────────────────────────────────────

/// Bearer token returned by the login endpoint. Never refreshed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

// ── Identifiers ───────────────────────────────────────────────────

pub const ENTITY_DEVICE: &str = "DEVICE";
pub const ENTITY_RULE_CHAIN: &str = "RULE_CHAIN";
pub const ENTITY_RULE_NODE: &str = "RULE_NODE";

/// The platform's id envelope: `{"entityType": "DEVICE", "id": "<uuid>"}`.
///
/// Credential ids are sent without an entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: &str, id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            id: id.into(),
        }
    }

    /// Fresh random id for a locally synthesized record.
    pub fn random(entity_type: &str) -> Self {
        Self::new(entity_type, Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Records that can be looked up by their unique display name.
pub trait Named {
    fn name(&self) -> &str;
}

// ── Paging ────────────────────────────────────────────────────────

/// One page of a text-search listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_as_empty")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub total_elements: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_next: false,
            total_elements: None,
            total_pages: None,
        }
    }
}

impl<T: Named> Page<T> {
    /// First entry whose name equals `name` exactly.
    ///
    /// Text search returns near matches ("Root Rule Chain v2" for
    /// "Root Rule Chain"), so the filter is mandatory.
    pub fn into_exact_match(self, name: &str) -> Option<T> {
        self.data.into_iter().find(|item| item.name() == name)
    }
}

// ── Devices ───────────────────────────────────────────────────────

/// A managed device, unique by name within the tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: EntityRef,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Named for Device {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Payload for creating a device.
#[derive(Debug, Clone, Serialize)]
pub struct NewDevice<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CredentialsType {
    #[default]
    #[serde(rename = "ACCESS_TOKEN")]
    AccessToken,
    #[serde(rename = "X509_CERTIFICATE")]
    X509Certificate,
    #[serde(rename = "MQTT_BASIC")]
    MqttBasic,
    #[serde(rename = "LWM2M_CREDENTIALS")]
    Lwm2mCredentials,
}

/// The credential record attached to a device. At most one exists per device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<EntityRef>,
    #[serde(default)]
    pub credentials_type: CredentialsType,
    /// The secret itself for `ACCESS_TOKEN` credentials.
    #[serde(default)]
    pub credentials_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_value: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceCredentials {
    /// A new access-token record with no platform id yet.
    pub fn access_token(device_id: EntityRef, secret: impl Into<String>) -> Self {
        Self {
            id: None,
            device_id: Some(device_id),
            credentials_type: CredentialsType::AccessToken,
            credentials_id: secret.into(),
            credentials_value: None,
            extra: Map::new(),
        }
    }
}

// ── Rule chains ───────────────────────────────────────────────────

/// A rule chain as listed by the rule chain search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleChain {
    pub id: EntityRef,
    pub name: String,
    #[serde(default)]
    pub root: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Named for RuleChain {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Position of a node in [`RuleChainMetadata::nodes`].
///
/// Connections refer to nodes through these positions, not through node ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed processing node inside a rule chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityRef>,
    /// Fully qualified node implementation, e.g. `org.thingsboard.rule.engine.kafka.TbKafkaNode`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub configuration: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A labeled edge between two node positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnection {
    pub from_index: NodeIndex,
    pub to_index: NodeIndex,
    /// Routing label, e.g. `Post telemetry`.
    #[serde(rename = "type")]
    pub label: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeConnection {
    pub fn new(from_index: NodeIndex, to_index: NodeIndex, label: impl Into<String>) -> Self {
        Self {
            from_index,
            to_index,
            label: label.into(),
            extra: Map::new(),
        }
    }

    pub fn links(&self, from: NodeIndex, to: NodeIndex, label: &str) -> bool {
        self.from_index == from && self.to_index == to && self.label == label
    }
}

/// The full graph document of a rule chain, read and replaced wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleChainMetadata {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub nodes: Vec<RuleNode>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub connections: Vec<NodeConnection>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
