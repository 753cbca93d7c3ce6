use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("playlist entry not found: {0}")]
    EntryNotFound(i64),

    #[error("media item not found: {0}")]
    ItemNotFound(i64),

    #[error("database lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
