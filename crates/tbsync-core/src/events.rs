//! Reconciliation events.
//!
//! Every corrective action a run takes is recorded as an event. The binary
//! prints them as progress markers; tests assert on them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::NodeIndex;

/// Which metadata endpoint accepted a rule chain write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteEndpoint {
    /// `POST /api/ruleChain/{id}/metadata`
    Primary,
    /// `POST /api/ruleChain/metadata`
    Legacy,
}

/// A single action taken (or confirmed) during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum ReconcileEvent {
    /// A session token was obtained.
    Authenticated { username: String },

    // ── Device events ─────────────────────────────────────────
    /// A device did not exist and was created.
    DeviceCreated { name: String, device_id: String },
    /// The device's access-token credential was upserted.
    CredentialsSaved {
        name: String,
        token: String,
        /// True when an existing credential record was updated in place.
        reused_record: bool,
    },

    // ── Rule chain events ─────────────────────────────────────
    /// The sink node was appended to the node sequence.
    SinkNodeAdded {
        chain: String,
        node_type: String,
        index: NodeIndex,
    },
    /// The routing edge from the dispatch node to the sink was appended.
    EdgeLinked {
        chain: String,
        from: NodeIndex,
        to: NodeIndex,
        label: String,
    },
    /// The metadata document was written back.
    GraphSaved {
        chain: String,
        endpoint: WriteEndpoint,
    },
    /// Sink node and edge were already present; nothing was written.
    GraphUnchanged { chain: String },
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated { username } => write!(f, "[+] Authenticated as {username}"),
            Self::DeviceCreated { name, .. } => write!(f, "[+] Created device {name}"),
            Self::CredentialsSaved { name, token, .. } => {
                write!(f, "[+] Ensured device {name} with token {token}")
            }
            Self::SinkNodeAdded { chain, .. } => write!(f, "[+] Added sink node to {chain}"),
            Self::EdgeLinked {
                chain,
                from,
                to,
                label,
            } => write!(f, "[+] Linked node {from} to sink {to} for {label} in {chain}"),
            Self::GraphSaved { chain, endpoint } => match endpoint {
                WriteEndpoint::Primary => write!(f, "[+] {chain} updated with sink forwarding"),
                WriteEndpoint::Legacy => write!(
                    f,
                    "[+] {chain} updated with sink forwarding (legacy endpoint)"
                ),
            },
            Self::GraphUnchanged { chain } => write!(f, "[=] {chain} already forwards to sink"),
        }
    }
}
