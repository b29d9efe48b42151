//! docwire - connectivity check
//!
//! Opens a stream to the configured server, trying each resolved address in
//! order, and reports the outcome.

use clap::Parser;
use docwire_transport::{
    AsyncSocketStream, Completion, SimpleBufferProvider, SocketStream, Stream, TransportConfig,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docwire")]
#[command(about = "Probe connectivity to a document database server")]
#[command(version)]
struct Cli {
    /// Server host (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the runtime-driven stream instead of the blocking one
    #[arg(long = "async")]
    use_async: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match TransportConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let address = config.address();
    tracing::info!("Probing {}", address);
    tracing::info!(
        "  Connect timeout: {:?}",
        config.socket.connect_timeout()
    );
    tracing::info!("  Read timeout: {:?}", config.socket.read_timeout());
    tracing::info!(
        "  TLS: {}",
        if config.ssl.enabled { "enabled" } else { "disabled" }
    );

    let buffers = Arc::new(SimpleBufferProvider);
    let result = if cli.use_async {
        let stream = AsyncSocketStream::new(
            address.clone(),
            config.socket.clone(),
            config.ssl.clone(),
            buffers,
            tokio::runtime::Handle::current(),
        );
        let (completion, opened) = Completion::oneshot();
        stream.open_async(completion);
        let result = opened.await;
        stream.close();
        result
    } else {
        let stream = SocketStream::new(
            address.clone(),
            config.socket.clone(),
            config.ssl.clone(),
            buffers,
        );
        tokio::task::spawn_blocking(move || {
            let result = stream.open();
            stream.close();
            result
        })
        .await?
    };

    match result {
        Ok(()) => {
            tracing::info!("Connected to {}", address);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Could not connect to {}: {}", address, e);
            Err(e.into())
        }
    }
}
