//! tbsync-core: Shared wire types, configuration, and error handling for tbsync.
//!
//! This crate provides the foundational types used across all tbsync components:
//! - Typed records for the platform's devices, credentials, and rule chains
//! - The rule chain metadata document (nodes plus index-referencing connections)
//! - Reconciliation events reported to the operator
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::CoreError;
pub use events::{ReconcileEvent, WriteEndpoint};
pub use types::{
    CredentialsType, Device, DeviceCredentials, EntityRef, NodeConnection, NodeIndex, Page,
    RuleChain, RuleChainMetadata, RuleNode, SessionToken,
};
