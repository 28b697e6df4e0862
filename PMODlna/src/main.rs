mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use pmobridge::encoders::probe_binary;
use pmobridge::{
    Discovery, PactlWatcher, PluginSet, ProcessPipelineFactory, Registry, RegistryOptions,
    api_router, prepare_encoders, stream_router, watch_sinks,
};
use pmoconfig::Config;
use pmoserver::{LoggingOptions, ServerBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_config(cli.config_dir.as_deref().unwrap_or(""))
        .context("Cannot load configuration")?;
    cli.apply_to(&config)?;

    // ========== PHASE 1 : Serveur et logs ==========

    let Some(builder) = ServerBuilder::from_config("PMODlna", &config) else {
        bail!("Could not determine the host address, please set it with --host");
    };
    let mut server = builder.build();
    server.init_logging(LoggingOptions::from_config(&config)).await;

    let encoders = prepare_encoders(
        config.get_encoder().as_deref(),
        config.get_bit_rate(),
        probe_binary,
    )?;
    for encoder in &encoders {
        info!("🎚️ Encoder available: {}", encoder);
    }

    // Le port doit être acquis avant d'annoncer la moindre URL
    let addr = server.bind().await?;
    info!("🔌 Stream server bound on {}", addr);

    // ========== PHASE 2 : Registre et routes ==========

    let http_timeout = Duration::from_secs(config.get_http_timeout_secs() as u64);
    let plugins = PluginSet::standard(http_timeout);
    let factory = Arc::new(ProcessPipelineFactory::new(config.get_capture_command()));
    let options = RegistryOptions {
        device_filter: config.get_device_filter(),
        sink_filter: config.get_sink_filter(),
        base_url: server.base_url(),
        encoders,
    };
    let (registry, registry_task) = Registry::spawn(options, plugins.clone(), factory);

    server.add_router("/", stream_router(registry.clone())).await;
    server.add_router("/", api_router(registry.clone())).await;

    let shutdown = CancellationToken::new();
    server.start(shutdown.clone()).await?;

    // ========== PHASE 3 : Sources d'événements ==========

    let watcher = tokio::spawn(watch_sinks(
        PactlWatcher::default(),
        registry.clone(),
        shutdown.clone(),
    ));

    let renderer_urls = config.get_renderer_urls();
    let mut listener = None;
    if renderer_urls.is_empty() {
        let discovery = Discovery::new(plugins, registry.clone());
        match discovery.spawn_listener(shutdown.clone()) {
            Ok(handle) => listener = Some(handle),
            Err(e) => warn!("⚠️ SSDP listener unavailable, relying on active search: {}", e),
        }

        let window = Duration::from_secs(config.get_search_timeout_secs() as u64);
        tokio::spawn(async move {
            if let Err(e) = discovery.search(window).await {
                warn!("⚠️ SSDP search failed: {}", e);
            }
        });
    } else {
        info!("📋 Using {} renderer URL(s), discovery disabled", renderer_urls.len());
        for url in renderer_urls {
            registry.add_renderer_by_url(url);
        }
    }

    info!("✅ PMODlna is ready at {}", server.base_url());
    info!("Press Ctrl+C to stop...");
    wait_for_signal().await;

    // ========== Arrêt ==========

    info!("🛑 Shutting down...");
    let grace = Duration::from_secs(config.get_shutdown_grace_secs() as u64);
    shutdown.cancel();
    registry.shutdown(grace).await;

    if tokio::time::timeout(grace, server.wait()).await.is_err() {
        warn!("HTTP server still draining after {:?}", grace);
    }
    let _ = watcher.await;
    let _ = registry_task.await;
    if let Some(handle) = listener {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }

    info!("PMODlna stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Shutdown signal received (Ctrl+C)"),
                    _ = term.recv() => info!("Shutdown signal received (SIGTERM)"),
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received (Ctrl+C)"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
