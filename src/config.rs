use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

use crate::stream::CachePolicy;

/// Options shared by every subcommand that touches the database.
#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    /// SQLite file holding channels, items and playlist entries.
    #[arg(long, env = "CHANNELRS_DATABASE", default_value = "channels.db")]
    pub database: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    #[arg(long, env = "CHANNELRS_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Directory local media locators are resolved against.
    #[arg(long, env = "CHANNELRS_MEDIA_ROOT", default_value = "media")]
    pub media_root: PathBuf,

    /// Public URL prefix under which local media is served.
    #[arg(long, env = "CHANNELRS_STREAM_BASE", default_value = "/stream")]
    pub stream_base: String,

    /// Allow caches to keep stream responses for this many seconds.
    /// Without it every stream response is `no-store`.
    #[arg(long, env = "CHANNELRS_CACHE_MAX_AGE")]
    pub cache_max_age: Option<u64>,
}

impl ServeConfig {
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_max_age(self.cache_max_age)
    }
}
