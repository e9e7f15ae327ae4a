use std::path::PathBuf;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub const DEFAULT_LOG_PATH: &str = "data.txt";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub log_path: PathBuf,
    pub channel_capacity: usize,
    /// `None` admits every connection.
    pub max_connections: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_connections: None,
        }
    }
}

impl Config {
    /// Positional arguments: `[listen_addr] [log_path]`.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut config = Self::default();

        if let Some(listen) = args.next() {
            config.listen_addr = listen;
        }

        if let Some(path) = args.next() {
            config.log_path = PathBuf::from(path);
        }

        config
    }
}
