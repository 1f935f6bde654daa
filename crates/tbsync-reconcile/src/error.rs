//! Error types for the tbsync-reconcile crate.

use thiserror::Error;

use tbsync_core::{CoreError, NodeIndex};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Request(#[from] tbsync_client::RequestError),

    /// Remote state the run depends on but never creates is missing.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Connection references node {index} but the chain has {node_count} nodes")]
    DanglingConnection { index: NodeIndex, node_count: usize },

    #[error("Config error: {0}")]
    Config(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
