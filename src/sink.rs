use chrono::{Local, SecondsFormat};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Append-only record store for dispatched messages.
pub struct LogSink<W = File> {
    writer: W,
}

impl LogSink<File> {
    /// Opens `path` in create-or-append mode. Existing content is never truncated.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| Error::OpenLog {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::new(file))
    }
}

impl<W: AsyncWrite + Unpin> LogSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn append(&mut self, msg: &Message) -> Result<()> {
        let record = format_record(msg, &timestamp());

        self.writer
            .write_all(record.as_bytes())
            .await
            .map_err(Error::Append)?;
        self.writer.flush().await.map_err(Error::Append)
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.flush().await.map_err(Error::Close)?;
        self.writer.shutdown().await.map_err(Error::Close)
    }
}

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_record(msg: &Message, ts: &str) -> String {
    format!(
        "Message from {}: {}. Received time: {}\n",
        msg.name,
        msg.text(),
        ts
    )
}
