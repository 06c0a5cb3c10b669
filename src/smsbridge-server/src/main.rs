// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use smsbridge_app::{init_logging, redact, ConfigFile};
use smsbridge_backend::{register_builtin_families_on, RegistrationContext};
use smsbridge_core::DynResult;
use smsbridge_server::hub::{HubClient, HubRelay};
use smsbridge_server::notify::LogListener;
use smsbridge_server::store::{CachedStore, PickleStore, Store};
use smsbridge_server::{Gateway, ServerConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SMS gateway daemon");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = ServerConfig::load(cli.config.as_deref())?;
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cli.log_level.as_deref().or(cfg.general.log_level.as_deref()));

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let db_path = cfg.storage.resolved_path();
    info!("Using database {}", db_path.display());
    let pickle = PickleStore::open(&db_path).map_err(|e| {
        format!(
            "Cannot open database {}: {} (move the file aside to start empty)",
            db_path.display(),
            e
        )
    })?;
    let store: Arc<dyn Store> = if cfg.storage.cache {
        Arc::new(CachedStore::new(pickle))
    } else {
        Arc::new(pickle)
    };

    let hub: Option<Arc<dyn HubRelay>> = if cfg.hub.enabled {
        info!(
            "Hub relay at {} (key {})",
            cfg.hub.base_url,
            redact(&cfg.hub.api_key)
        );
        Some(Arc::new(HubClient::new(&cfg.hub)?))
    } else {
        info!("Hub relay disabled; messages are stored only");
        None
    };

    let mut context = RegistrationContext::new();
    register_builtin_families_on(&mut context);
    info!("Device families: {}", context.registered_families().join(", "));

    let gateway = Arc::new(Gateway::new(Arc::new(context), &cfg, store, hub));
    gateway.add_listener(Arc::new(LogListener));
    gateway.restore_devices(&cfg.devices)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_handles = gateway.spawn_loops(shutdown_rx);

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(400)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    gateway.shutdown().await;
    Ok(())
}
