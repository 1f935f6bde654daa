//! CLI entry point for the tbsync bootstrapper.
//!
//! Prints one progress marker per action to stdout; logs go to stderr.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tbsync_core::config::BootstrapConfig;
use tbsync_reconcile::{run_bootstrap, RunOptions};

#[derive(Parser)]
#[command(name = "tbsync")]
#[command(about = "Reconcile devices and Kafka forwarding on an IoT platform")]
struct Cli {
    /// Config file prefix (default: tbsync).
    #[arg(short, long, default_value = "tbsync")]
    config: String,

    /// Platform base URL.
    #[arg(long, env = "TB_URL")]
    url: Option<String>,

    #[arg(long, env = "TB_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "TB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Kafka bootstrap servers written into the sink node.
    #[arg(long, env = "KAFKA_BOOTSTRAP")]
    kafka_bootstrap: Option<String>,

    #[arg(long, env = "KAFKA_TOPIC")]
    kafka_topic: Option<String>,

    /// Devices as JSON: `[{"name": "drone-1", "token": "..."}]`.
    #[arg(long, env = "TB_DEVICES", hide_env_values = true)]
    devices: Option<String>,

    /// Skip the health-endpoint wait.
    #[arg(long)]
    skip_wait: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let options = RunOptions {
        wait_for_ready: !cli.skip_wait,
    };
    let report = run_bootstrap(&config, options, |event| println!("{event}")).await?;

    println!(
        "[+] Bootstrap complete: {} device(s), chain {}",
        report.devices.len(),
        report.chain.name
    );
    Ok(())
}

/// Layer command-line values over the file/environment configuration.
fn resolve_config(cli: &Cli) -> anyhow::Result<BootstrapConfig> {
    let mut config = BootstrapConfig::load(&cli.config)?;

    if let Some(url) = &cli.url {
        config.platform.url = url.clone();
    }
    if let Some(username) = &cli.username {
        config.platform.username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.platform.password = password.clone();
    }
    if let Some(servers) = &cli.kafka_bootstrap {
        config.kafka.bootstrap_servers = servers.clone();
    }
    if let Some(topic) = &cli.kafka_topic {
        config.kafka.topic = topic.clone();
    }
    if let Some(raw) = &cli.devices {
        config.devices = BootstrapConfig::parse_devices(raw)?;
    }

    config.validate()?;
    Ok(config)
}
