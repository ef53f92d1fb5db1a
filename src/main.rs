//! Process entry point: configuration, plugin assembly, and either the
//! proxy server or the administration shell.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use palisade::config::{self, ProxyConfig};
use palisade::firewall::{Firewall, FirewallStore};
use palisade::lifecycle::signals;
use palisade::net::Listener;
use palisade::plugin::ProxyPlugin;
use palisade::shell::AdminShell;
use palisade::{Pipeline, ProxyServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "palisade", about = "Plugin-driven forward proxy with a rule-based firewall")]
struct Args {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override (host:port).
    #[arg(long)]
    listen: Option<String>,

    /// Run the administration shell instead of the proxy.
    #[arg(long)]
    shell: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.bind_address = listen;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("palisade={}", config.observability.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        rules_file = %config.firewall.rules_file.display(),
        "configuration loaded"
    );

    // The firewall handle is shared: the pipeline holds one clone for
    // request verdicts, the store and shell hold others for edits.
    let firewall = Firewall::new();
    let store = FirewallStore::new(firewall.clone(), &config.firewall.rules_file);

    let mut pipeline = Pipeline::new(vec![
        Arc::new(firewall.clone()) as Arc<dyn ProxyPlugin>,
        Arc::new(store),
    ])?;
    pipeline.initialize()?;

    if args.shell {
        let shell = AdminShell::new(firewall, Arc::new(pipeline), &config.firewall.rules_file);
        shell.run().await?;
        return Ok(());
    }

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    signals::trigger_on_ctrl_c(&shutdown);

    let server = ProxyServer::new(config, pipeline);
    server.run(listener, shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
