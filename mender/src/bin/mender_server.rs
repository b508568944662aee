//! mender-server: the HTTP boundary binary.

use anyhow::Context;
use clap::Parser;
use mender::config::{DatastoreKind, MenderConfig};
use mender::orchestrator::Mender;
use mender::store::{Datastore, FileDatastore, MemoryDatastore};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mender-server", about = "Self-healing API integration proxy")]
struct Args {
    /// Port to listen on; overrides MENDER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = MenderConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }

    let store: Arc<dyn Datastore> = match config.datastore {
        DatastoreKind::Memory => Arc::new(MemoryDatastore::new()),
        DatastoreKind::File => Arc::new(
            FileDatastore::new(&config.storage_dir)
                .with_context(|| format!("opening datastore at {}", config.storage_dir))?,
        ),
    };

    let mender = Arc::new(Mender::from_config(&config, store).context("assembling pipeline")?);
    let app = mender::server::router(&config, mender);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("mender-server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
