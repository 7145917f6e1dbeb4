//! ZBProxy entry point
//!
//! Loads the JSON config (creating a default one if missing), starts one
//! listener per service and runs until SIGINT/SIGTERM.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use zbproxy::config::{self, ConfigFile, ConnConfig, ServiceConfig};
use zbproxy::core::hooks::{CapabilityProbe, SystemProbe};
use zbproxy::core::ListStore;
use zbproxy::logger::{self, log, LogLevel};
use zbproxy::reload;
use zbproxy::server_runner::Proxy;

async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                log::info!("SIGINT received, shutting down...");
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        log::info!("Shutdown signal received...");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = config::CliArgs::parse_args();
    cli.validate()?;

    logger::init_logger(LogLevel::parse(&cli.log_level));

    log::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting ZBProxy"
    );

    let file = ConfigFile::load_or_create(&cli.config)
        .with_context(|| format!("failed to load config file {}", cli.config.display()))?;

    let probe = SystemProbe::detect();
    log::debug!(
        splice = probe.splice_available(),
        pipe_resize = probe.pipe_resize_available(),
        "Kernel relay capabilities"
    );

    let lists = Arc::new(ListStore::new(file.access_lists()));
    let proxy = Arc::new(Proxy::new(lists, ConnConfig::from_cli(&cli), Arc::new(probe)));

    for raw in &file.services {
        let started = match ServiceConfig::resolve(raw) {
            Ok(service) => proxy.start_service(service).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            log::error!(service = %raw.name, error = %e, "Failed to start service");
        }
    }
    if proxy.service_count() == 0 {
        bail!("no service could be started");
    }

    let token = CancellationToken::new();
    reload::spawn(
        Arc::clone(&proxy),
        cli.config.clone(),
        cli.reload_interval,
        token.clone(),
    );

    wait_for_shutdown().await?;
    token.cancel();
    proxy.shutdown();
    log::info!("All listeners closed");
    Ok(())
}
