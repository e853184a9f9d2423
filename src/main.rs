//! hub-gateway binary.
//!
//! Runs the gateway on an in-process hub. With `--memory-store` an in-memory
//! data layer answers CRUD requests, which makes the binary usable as a
//! standalone demo:
//!
//! ```text
//! hub-gateway --memory-store --resource widgets:/widgets
//! curl -XPOST localhost:3000/widgets -H 'content-type: application/json' -d '{"a":1}'
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use hub_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use hub_gateway::hub::{Bus, LocalHub, MemoryStore};
use hub_gateway::lifecycle::terminate_signal;
use hub_gateway::observability::{init_logging, metrics::init_metrics};
use hub_gateway::{Gateway, ResourceDescriptor};

#[derive(Parser)]
#[command(name = "hub-gateway")]
#[command(about = "HTTP gateway for an in-process event hub", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// Answer CRUD requests from an in-memory store.
    #[arg(long)]
    memory_store: bool,

    /// Expose a resource as NAME:PATH (repeatable).
    #[arg(long = "resource", value_name = "NAME:PATH", value_parser = parse_resource)]
    resources: Vec<ResourceDescriptor>,
}

fn parse_resource(raw: &str) -> Result<ResourceDescriptor, String> {
    let (name, path) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:PATH, got {:?}", raw))?;
    let descriptor = ResourceDescriptor::new(name, path);
    descriptor.validate().map_err(|e| e.to_string())?;
    Ok(descriptor)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!("hub-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let hub = Arc::new(LocalHub::new());
    if cli.memory_store {
        if let Some(requests) = hub.take_data_requests() {
            tokio::spawn(MemoryStore::new().serve(requests));
            tracing::info!("in-memory data layer attached");
        }
    }
    let mut fatal = hub.shutdown_signal();

    let gateway = Gateway::new(Arc::clone(&hub) as Arc<dyn Bus>).spawn();
    for descriptor in cli.resources {
        if let Err(e) = gateway.crud(descriptor).await {
            tracing::error!(error = %e, "failed to register resource");
        }
    }
    if let Err(e) = gateway.configure(config).await {
        tracing::error!(error = %e, "configuration rejected");
        return ExitCode::FAILURE;
    }

    // Kept alive for the life of the process.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let forward = gateway.clone();
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    match forward.configure(config).await {
                        Ok(state) => tracing::info!(state = %state, "configuration reloaded"),
                        Err(e) => tracing::warn!(error = %e, "reloaded configuration rejected"),
                    }
                }
            });
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::error!(error = %e, "failed to watch configuration file");
                    None
                }
            }
        }
        _ => None,
    };

    if let Err(e) = gateway.start().await {
        if hub.shutdown_requests() > 0 {
            return ExitCode::FAILURE;
        }
        tracing::warn!(error = %e, "gateway is not serving HTTP");
    }

    tokio::select! {
        _ = terminate_signal() => {
            if let Err(e) = gateway.stop().await {
                tracing::error!(error = %e, "failed to stop gateway");
            }
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        _ = fatal.recv() => {
            tracing::error!("fatal shutdown requested; exiting");
            ExitCode::FAILURE
        }
    }
}
