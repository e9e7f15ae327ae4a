mod config;
mod conn;
mod dispatcher;
mod error;
mod protocol;
mod server;
mod sink;
mod state;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::server::Server;

fn spawn_shutdown_handler(server: &Server) {
    let token = server.shutdown_token();
    let state = server.state();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(live = state.len(), "ctrl-c received, shutting down");
                token.cancel();
            }
            Err(err) => error!(%err, "failed to listen for ctrl-c"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_args(std::env::args().skip(1));

    let server = Server::bind(config).await?;
    info!(addr = %server.local_addr()?, "listening");

    spawn_shutdown_handler(&server);

    let stats = server.run(std::future::pending()).await;

    info!(
        dispatched = stats.dispatched,
        log_failures = stats.log_failures,
        "shut down"
    );

    Ok(())
}
