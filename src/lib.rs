pub mod clock;
pub mod config;
pub mod error;

pub mod media;
pub mod playlist;
pub mod schedule;

pub mod range;
pub mod stream;

pub mod db;
pub mod reply;
pub mod server;

pub use error::{Error, Result};
