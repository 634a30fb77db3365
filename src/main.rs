use std::panic;
use std::sync::Arc;

use tokio::{io::BufReader, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::core::pipeline::{
    accepting::handle_accepting,
    judging::{InFlight, handle_judging},
    publishing::{JsonLinesPublisher, handle_publishing},
};
use crate::native::executor::NativeProcessExecutor;
use crate::strategies::registry::StrategyRegistry;

mod checkers;
mod config;
mod constants;
mod core;
mod native;
mod strategies;


#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let config = EngineConfig::from_env()?;
    let run_executor = NativeProcessExecutor::from_settings(&config.executor)?;
    if !run_executor.is_restricted() {
        tracing::warn!("No restricted identity configured, submissions run as the engine user");
    }
    let compile_executor = NativeProcessExecutor::standard(config.executor.clone());

    let registry = StrategyRegistry::from_config(
        &config,
        Arc::new(run_executor),
        Arc::new(compile_executor),
    )?;
    if registry.is_empty() {
        tracing::warn!("No toolchains configured, every submission will fail");
    }

    let shutdown = CancellationToken::new();
    let (job_tx, job_rx) = mpsc::channel(config.pipeline.channel_capacity);
    let (update_tx, update_rx) = mpsc::channel(config.pipeline.channel_capacity);

    let accepting = handle_accepting(BufReader::new(tokio::io::stdin()), job_tx, shutdown.clone());
    let judging = handle_judging(
        job_rx,
        update_tx,
        Arc::new(registry),
        config.pipeline.clone(),
        InFlight::default(),
        shutdown.clone(),
    );
    let publishing = handle_publishing(update_rx, Arc::new(JsonLinesPublisher::new(tokio::io::stdout())));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutting down, cancelling in-flight submissions");
            shutdown.cancel();
        }
    });

    tracing::info!(workers = config.pipeline.workers, "Judge engine started");
    accepting.await?;
    judging.await?;
    publishing.await?;
    tracing::info!("Judge engine stopped");

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
