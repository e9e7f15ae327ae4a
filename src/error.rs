use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {}: {source}", .path.display())]
    OpenLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to append to log: {0}")]
    Append(#[source] io::Error),

    #[error("failed to close log: {0}")]
    Close(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
