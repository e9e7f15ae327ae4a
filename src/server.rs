use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::conn::{self, ConnCtx};
use crate::dispatcher::{self, DispatchStats};
use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::sink::LogSink;
use crate::state::ServerState;

/// A bound server with its dispatcher already running.
pub struct Server {
    config: Config,
    listener: TcpListener,
    state: ServerState,
    tx: mpsc::Sender<Message>,
    dispatcher: JoinHandle<DispatchStats>,
    shutdown: CancellationToken,
    readers: TaskTracker,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Self> {
        let sink = LogSink::open(&config.log_path).await?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let dispatcher = tokio::spawn(dispatcher::run(rx, sink));

        Ok(Self {
            config,
            listener,
            state: ServerState::default(),
            tx,
            dispatcher,
            shutdown: CancellationToken::new(),
            readers: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> ServerState {
        self.state.clone()
    }

    /// Cancelling this token stops the server as if `quit` had resolved.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until `quit` resolves or the shutdown token is
    /// cancelled, then stops readers, drains the dispatcher and closes the log.
    pub async fn run<F>(self, quit: F) -> DispatchStats
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            listener,
            state,
            tx,
            dispatcher,
            shutdown,
            readers,
        } = self;

        info!(addr = %config.listen_addr, log = %config.log_path.display(), "running");

        let ctx = ConnCtx {
            state,
            tx,
            shutdown: shutdown.clone(),
        };
        let acceptor = tokio::spawn(accept_loop(
            listener,
            ctx,
            readers.clone(),
            config.max_connections,
        ));

        tokio::select! {
            _ = quit => info!("quit signal received"),
            _ = shutdown.cancelled() => info!("shutdown requested"),
        }

        info!("stopping");
        shutdown.cancel();

        if let Err(err) = acceptor.await {
            error!(%err, "accept loop panicked");
        }

        readers.close();
        readers.wait().await;
        debug!("all readers finished");

        // Every sender is gone now, so the dispatcher drains and exits.
        let stats = match dispatcher.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(%err, "dispatcher panicked");
                DispatchStats::default()
            }
        };

        info!(dispatched = stats.dispatched, "stopped");

        stats
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ConnCtx,
    readers: TaskTracker,
    max_connections: Option<usize>,
) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (socket, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept error");
                continue;
            }
        };

        if let Some(max) = max_connections {
            if ctx.state.len() >= max {
                warn!(%peer, max, "connection limit reached, rejecting");
                continue;
            }
        }

        let id = ctx.state.register(peer);
        info!(%peer, conn_id = id, "new connection");

        let ctx = ctx.clone();
        readers.spawn(async move {
            if let Err(err) = conn::handle(ctx, id, socket, peer).await {
                error!(%peer, conn_id = id, "connection error: {err:#}");
            }
        });
    }

    let open = ctx.state.list_connections();
    if !open.is_empty() {
        info!(count = open.len(), "closing live connections");
        for (id, info) in &open {
            debug!(
                conn_id = id,
                peer = %info.peer,
                name = info.name.as_deref().unwrap_or("-"),
                since = %info.connected_at,
                "closing"
            );
        }
    }
}
