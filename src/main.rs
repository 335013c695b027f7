use std::net::{IpAddr, SocketAddr};

use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod producer;
mod storage;

use api::AppState;
use config::Config;
use storage::CameraStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crowdwatch=debug".parse()?))
        .init();

    let config = Config::load()?;

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve(config).await?,
        Some("producer") => producer::run(config.producer()?.clone()).await?,
        Some(other) => {
            eprintln!("unknown command '{other}'");
            eprintln!("usage: crowdwatch [serve|producer]");
            std::process::exit(2);
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let host: IpAddr = config.http.host.parse()?;
    let addr = SocketAddr::new(host, config.http.port);

    tracing::info!(
        crowd_threshold = config.dashboard.crowd_threshold,
        "aggregation store ready"
    );

    let state = AppState::new(CameraStore::new(), config.dashboard.crowd_threshold)
        .with_video_feed(config.dashboard.video_feed_url);
    api::start_server(state, addr).await?;

    Ok(())
}
