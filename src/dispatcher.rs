use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::protocol::Message;
use crate::sink::LogSink;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub log_failures: u64,
}

/// Sole consumer of the message channel. Prints and logs each message in
/// arrival order until every sender is gone and the queue is drained, then
/// closes the sink.
pub async fn run<W>(mut rx: mpsc::Receiver<Message>, mut sink: LogSink<W>) -> DispatchStats
where
    W: AsyncWrite + Unpin,
{
    let mut stats = DispatchStats::default();

    while let Some(msg) = rx.recv().await {
        println!(
            "Received message from connection: {} Sender: {} Message: {}",
            msg.from,
            msg.name,
            msg.text()
        );

        if let Err(err) = sink.append(&msg).await {
            error!(%err, from = %msg.from, name = %msg.name, "log append failed");
            stats.log_failures += 1;
        }

        stats.dispatched += 1;
    }

    if let Err(err) = sink.close().await {
        error!(%err, "closing log sink failed");
    }

    info!(dispatched = stats.dispatched, log_failures = stats.log_failures, "dispatcher drained");

    stats
}
