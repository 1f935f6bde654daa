//! One bootstrap run: readiness, login, devices, then the rule chain.
//!
//! Steps run strictly in sequence. The first failure aborts the run; there
//! is no partial success.

use tbsync_client::ApiClient;
use tbsync_core::config::BootstrapConfig;
use tbsync_core::{Device, ReconcileEvent, RuleChain};

use crate::device::ensure_entity;
use crate::error::Result;
use crate::rule_chain::{ensure_sink_and_edge, kafka_sink_configuration};

/// Knobs that belong to the invocation rather than to the target state.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Poll the health endpoint before logging in.
    pub wait_for_ready: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
        }
    }
}

/// Everything a successful run did.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub devices: Vec<Device>,
    pub chain: RuleChain,
    pub events: Vec<ReconcileEvent>,
}

/// Reconcile every configured device, then the rule chain.
///
/// `on_event` sees each event as soon as the step producing it finishes.
pub async fn run_bootstrap(
    config: &BootstrapConfig,
    options: RunOptions,
    mut on_event: impl FnMut(&ReconcileEvent),
) -> Result<BootstrapReport> {
    config.validate()?;
    let client = ApiClient::new(&config.platform)?;
    let mut events = Vec::new();
    let mut record = |batch: Vec<ReconcileEvent>| {
        for event in batch {
            on_event(&event);
            events.push(event);
        }
    };

    if options.wait_for_ready {
        tracing::info!(url = %config.platform.url, "Waiting for platform API");
        client.wait_until_ready().await?;
    }

    let token = client
        .login(&config.platform.username, &config.platform.password)
        .await?;
    record(vec![ReconcileEvent::Authenticated {
        username: config.platform.username.clone(),
    }]);

    let mut devices = Vec::with_capacity(config.devices.len());
    for desired in &config.devices {
        let outcome = ensure_entity(
            &client,
            &token,
            &desired.name,
            &desired.token,
            &config.device_type,
        )
        .await?;
        record(outcome.events);
        devices.push(outcome.device);
    }

    let sink_configuration = kafka_sink_configuration(&config.kafka);
    let graph = ensure_sink_and_edge(&client, &token, &config.rule_chain, &sink_configuration).await?;
    record(graph.events);

    tracing::info!(
        devices = devices.len(),
        actions = events.len(),
        "Bootstrap complete"
    );

    Ok(BootstrapReport {
        devices,
        chain: graph.chain,
        events,
    })
}
