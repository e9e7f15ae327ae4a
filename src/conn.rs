use anyhow::{Context, Result, bail};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{Command, Line, Message, classify};
use crate::state::ServerState;

/// What a reader task needs from the server.
#[derive(Clone)]
pub struct ConnCtx {
    pub state: ServerState,
    pub tx: mpsc::Sender<Message>,
    pub shutdown: CancellationToken,
}

enum ReadOutcome {
    Line,
    Closed,
}

/// Reads one `\n`-terminated line into `buf`. A fragment cut off by
/// end-of-stream is not a line.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadOutcome>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    reader.read_until(b'\n', buf).await?;

    if buf.last() == Some(&b'\n') {
        Ok(ReadOutcome::Line)
    } else {
        Ok(ReadOutcome::Closed)
    }
}

/// Runs one connection: name handshake, then the message loop. The socket is
/// owned here and dropped, closing it, on every return path.
pub async fn handle<S>(ctx: ConnCtx, id: u64, socket: S, peer: SocketAddr) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let _registered = ctx.state.guard(id);

    let mut reader = BufReader::new(socket);
    let mut buf = Vec::new();

    let handshake = tokio::select! {
        _ = ctx.shutdown.cancelled() => return Ok(()),
        read = read_line(&mut reader, &mut buf) => read,
    };

    match handshake.context("error reading sender's name")? {
        ReadOutcome::Line => {}
        ReadOutcome::Closed => bail!("connection closed before sending a name"),
    }

    let name = String::from_utf8_lossy(&buf).trim().to_string();
    ctx.state.set_name(id, &name);
    debug!(%peer, conn_id = id, %name, "handshake complete");

    loop {
        let read = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                debug!(%peer, conn_id = id, "reader stopping for shutdown");
                break;
            }
            read = read_line(&mut reader, &mut buf) => read,
        };

        match read.context("read error")? {
            ReadOutcome::Line => {}
            ReadOutcome::Closed => {
                info!(%peer, conn_id = id, "connection closed by client");
                break;
            }
        }

        match classify(&buf) {
            Line::Command(Command::Join) => {
                info!(%peer, "User {peer} joined the chat.");
            }
            Line::Command(Command::Unrecognized(cmd)) => {
                debug!(%peer, %cmd, "ignoring unrecognized command");
            }
            Line::Chat => {
                let msg = Message {
                    from: peer.to_string(),
                    name: name.clone(),
                    payload: std::mem::take(&mut buf),
                };

                tokio::select! {
                    biased;
                    sent = ctx.tx.send(msg) => {
                        if sent.is_err() {
                            warn!(%peer, conn_id = id, "dispatch channel closed");
                            break;
                        }
                    }
                    _ = ctx.shutdown.cancelled() => {
                        debug!(%peer, conn_id = id, "message dropped during shutdown");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::task::JoinHandle;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    fn spawn_reader(
        capacity: usize,
    ) -> (
        tokio::io::DuplexStream,
        mpsc::Receiver<Message>,
        ConnCtx,
        JoinHandle<Result<()>>,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = ConnCtx {
            state: ServerState::default(),
            tx,
            shutdown: CancellationToken::new(),
        };
        let id = ctx.state.register(peer());
        let task = tokio::spawn(handle(ctx.clone(), id, server, peer()));

        (client, rx, ctx, task)
    }

    async fn drain(mut rx: mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn chat_lines_become_messages_and_commands_do_not() {
        let (mut client, rx, ctx, task) = spawn_reader(10);
        drop(ctx);

        client
            .write_all(b"  alice \nhello world\n/join\n/whatever you like\nbye\n")
            .await
            .unwrap();
        drop(client);

        task.await.unwrap().unwrap();

        let msgs = drain(rx).await;
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.name == "alice"));
        assert!(msgs.iter().all(|m| m.from == "127.0.0.1:50000"));
        assert_eq!(msgs[0].payload, b"hello world\n");
        assert_eq!(msgs[1].payload, b"bye\n");
    }

    #[tokio::test]
    async fn payload_keeps_trailing_whitespace() {
        let (mut client, rx, ctx, task) = spawn_reader(10);
        drop(ctx);

        client.write_all(b"bob\r\nspaced out  \r\n").await.unwrap();
        drop(client);
        task.await.unwrap().unwrap();

        let msgs = drain(rx).await;
        assert_eq!(msgs[0].name, "bob");
        assert_eq!(msgs[0].payload, b"spaced out  \r\n");
    }

    #[tokio::test]
    async fn eof_before_name_fails_handshake() {
        let (mut client, rx, ctx, task) = spawn_reader(10);
        let state = ctx.state.clone();
        drop(ctx);

        client.write_all(b"ali").await.unwrap();
        drop(client);

        assert!(task.await.unwrap().is_err());
        assert!(drain(rx).await.is_empty());
        assert_eq!(state.len(), 0);
    }

    #[tokio::test]
    async fn unterminated_last_line_is_discarded() {
        let (mut client, rx, ctx, task) = spawn_reader(10);
        let state = ctx.state.clone();
        drop(ctx);

        client.write_all(b"dave\nfirst\nsecond").await.unwrap();
        drop(client);
        task.await.unwrap().unwrap();

        let msgs = drain(rx).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, b"first\n");
        assert_eq!(state.len(), 0);
    }

    #[tokio::test]
    async fn name_is_recorded_in_registry() {
        let (mut client, _rx, ctx, task) = spawn_reader(10);

        client.write_all(b"erin\n").await.unwrap();

        let mut named = false;
        for _ in 0..100 {
            if ctx.state.list_connections().iter().any(|(_, c)| c.name.as_deref() == Some("erin")) {
                named = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(named);

        drop(client);
        task.await.unwrap().unwrap();
        assert_eq!(ctx.state.len(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_reader() {
        let (mut client, _rx, ctx, task) = spawn_reader(10);
        client.write_all(b"frank\n").await.unwrap();

        ctx.shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("reader should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_reader_blocked_on_full_channel() {
        let (mut client, mut rx, ctx, task) = spawn_reader(1);

        client.write_all(b"gina\none\ntwo\n").await.unwrap();

        // "one" fills the single slot, "two" waits for room.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload, b"one\n");
        client.write_all(b"three\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        ctx.shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("reader should stop")
            .unwrap()
            .unwrap();
    }
}
