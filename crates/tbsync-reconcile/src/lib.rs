//! tbsync-reconcile: Idempotent reconciliation of devices and rule chains.
//!
//! Reads remote state through `tbsync-client`, computes the minimal set of
//! creates and appends needed to reach the configured state, and applies
//! them. Every operation is safe to re-run against partially applied state.

pub mod device;
pub mod error;
pub mod graph;
pub mod rule_chain;
pub mod run;

pub use device::{ensure_entity, DeviceOutcome};
pub use error::{ReconcileError, Result};
pub use graph::RuleGraph;
pub use rule_chain::{ensure_sink_and_edge, GraphOutcome};
pub use run::{run_bootstrap, BootstrapReport, RunOptions};
