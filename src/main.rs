// src/main.rs
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info};

mod backpressure;
mod channel;
mod config;
mod metrics;
mod scheduler;
mod server;
mod transport;

use crate::{
    channel::AcceptorChannel,
    config::AcceptorOptions,
    metrics::MetricsRegistry,
    scheduler::{Scheduler, TokioScheduler},
    server::AcceptLoop,
    transport::AcceptTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("accept_channel=debug".parse()?),
        )
        .init();

    // Load acceptor options
    let options = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading options from: {}", path);
            config::load_options(&path).await?
        }
        None => AcceptorOptions::default(),
    };

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());
    #[cfg(unix)]
    let transport: Box<dyn AcceptTransport> = Box::new(transport::PolledTcpTransport::new());
    #[cfg(not(unix))]
    let transport: Box<dyn AcceptTransport> =
        Box::new(transport::BlockingTcpTransport::new(options.so_timeout()));
    let channel = Arc::new(AcceptorChannel::new(
        &options,
        transport,
        scheduler.clone(),
        Some(metrics_registry.collector()),
    ));

    let addr: SocketAddr = "0.0.0.0:8080".parse()?;
    channel.bind(addr).await?;
    info!("Accepting connections on {}", addr);

    let (tx, mut rx) = mpsc::channel(16);
    let loop_handle = tokio::spawn(AcceptLoop::new(channel.clone(), tx).run());

    loop {
        tokio::select! {
            accepted = rx.recv() => {
                match accepted {
                    Some(accepted) => {
                        info!(
                            channel = %accepted.id(),
                            peer = %accepted.remote_addr(),
                            "connection accepted"
                        );
                        // Hand the connection off on the channel's context.
                        // This demo just logs and drops it; a real host would
                        // register the stream with its framework here.
                        scheduler.run_on_context(Box::new(move || {
                            let stream = accepted.into_stream();
                            drop(stream);
                        }));
                    }
                    None => break,
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                channel.close().await;
            }
        }
    }

    loop_handle.await??;

    debug!(
        "final metrics:\n{}",
        String::from_utf8_lossy(&metrics_registry.gather())
    );
    Ok(())
}
