//! Arsenal discovery server.
//!
//! Loads the configuration, registers the configured registries, assembles
//! the discovery pipeline, and serves the webhook surface until a
//! termination signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use discovery::infra::{MemoryCatalog, OciClient, OciOcmClient};
use discovery::{AppConfig, Pipeline, PipelineDeps, RegistryProvider};

#[derive(Debug, Parser)]
#[command(name = "arsenal-server", version, about = "OCM component version discovery")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as YAML and exit.
    #[arg(long)]
    print_config: bool,

    /// Raise console log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("arsenal-server: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_ref())?;
    config.apply_cli_overrides(args.verbose);
    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    discovery::logging::init(&config.logging);
    tracing::info!(registries = config.registries.len(), "starting arsenal-server");

    let provider = Arc::new(RegistryProvider::new());
    let mut registries = Vec::with_capacity(config.registries.len());
    for entry in config.registries.clone() {
        registries.push(entry.into_registry()?);
    }
    provider
        .register(registries)
        .context("failed to register configured registries")?;

    let oci = Arc::new(OciClient::new()?);
    let deps = PipelineDeps {
        oci: Arc::clone(&oci) as Arc<dyn discovery_sdk::ocm::OciCatalog>,
        ocm: Arc::new(OciOcmClient::new(oci)),
        catalog: Arc::new(MemoryCatalog::new()),
    };
    let pipeline = Pipeline::build(&config, provider, deps)?;

    let listener = tokio::net::TcpListener::bind(config.server.listen.as_str())
        .await
        .with_context(|| format!("failed to bind webhook listener on {}", config.server.listen))?;
    tracing::info!(listen = %config.server.listen, "webhook server listening");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let app = pipeline.webhook_router();
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    pipeline.run(cancel).await;

    // The pipeline is down; give in-flight HTTP connections a bounded
    // window to drain.
    match tokio::time::timeout(config.server.shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => return Err(anyhow::Error::new(err).context("webhook server failed")),
        Ok(Err(err)) => tracing::warn!(error = %err, "webhook server task failed"),
        Err(_) => tracing::warn!("webhook server exceeded the shutdown budget"),
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    _ = tokio::signal::ctrl_c().await;
                    tracing::info!("received interrupt");
                }
            }
        }
        #[cfg(not(unix))]
        {
            _ = tokio::signal::ctrl_c().await;
            tracing::info!("received interrupt");
        }
        cancel.cancel();
    });
}
