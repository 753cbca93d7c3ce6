use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use channelrs::clock::{Clock, SystemClock};
use channelrs::config::{DatabaseConfig, ServeConfig};
use channelrs::db::Database;
use channelrs::media::{Locator, NewMediaItem};
use channelrs::server::{make_server, now_playing_at, AppState};
use channelrs::stream::MediaStore;

#[derive(Parser)]
#[command(about = "Shared live channel scheduler and range media server")]
pub struct Cli {
    #[command(flatten)]
    pub db: DatabaseConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the now-playing and stream endpoints.
    Serve(ServeConfig),

    /// Create a channel whose broadcast clock starts now.
    CreateChannel {
        slug: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Publish a media item to the end of a channel's rotation.
    Publish {
        channel: String,
        title: String,
        /// Remote URL or path relative to the media root.
        locator: String,
        #[arg(long)]
        duration: Option<i64>,
        /// Force the live-feed flag instead of inferring it from the locator.
        #[arg(long)]
        live: Option<bool>,
    },

    /// Take an entry out of rotation without deleting it.
    Deactivate { entry_id: i64 },

    /// Move an entry to a new position in the rotation.
    Reorder { entry_id: i64, sort_key: i64 },

    /// Restart a channel's broadcast clock. Every viewer jumps.
    ResetAnchor {
        slug: String,
        /// RFC 3339 timestamp, defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Print every entry of a channel.
    List { channel: String },

    /// Print what a channel is playing right now.
    Now {
        channel: String,
        #[arg(long, default_value = "/stream")]
        stream_base: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db = Database::file(&cli.db.database)
        .with_context(|| format!("opening database {}", cli.db.database.display()))?;
    let clock = SystemClock;

    match cli.command {
        Command::Serve(config) => {
            let store = MediaStore::new(&config.media_root)
                .with_context(|| format!("opening media root {}", config.media_root.display()))?;
            let state = AppState {
                db,
                store,
                clock: Arc::new(clock),
                cache: config.cache_policy(),
                stream_base: config.stream_base.clone(),
            };

            info!(bind = %config.bind, media_root = %config.media_root.display(), "serving");
            warp::serve(make_server(state)).run(config.bind).await;
        }
        Command::CreateChannel { slug, name } => {
            let name = name.unwrap_or_else(|| slug.clone());
            let channel = db.ensure_channel(&slug, &name, clock.now())?;
            println!("{}", serde_json::to_string_pretty(&channel)?);
        }
        Command::Publish {
            channel,
            title,
            locator,
            duration,
            live,
        } => {
            let item = db.insert_item(NewMediaItem {
                title,
                duration_seconds: duration,
                locator: Locator::parse(&locator),
                is_continuous: live,
            })?;
            let entry_id = db.publish_append(&channel, item.id)?;
            println!(
                "{}",
                serde_json::json!({ "entry_id": entry_id, "item": item })
            );
        }
        Command::Deactivate { entry_id } => {
            db.deactivate_entry(entry_id)?;
        }
        Command::Reorder { entry_id, sort_key } => {
            db.set_sort_key(entry_id, sort_key)?;
        }
        Command::ResetAnchor { slug, at } => {
            let channel = db.reset_anchor(&slug, at.unwrap_or_else(|| clock.now()))?;
            println!("{}", serde_json::to_string_pretty(&channel)?);
        }
        Command::List { channel } => {
            for entry in db.entries(&channel)? {
                println!(
                    "{:>5} key={:<5} {} {:>6}s {}{} {}",
                    entry.id,
                    entry.sort_key,
                    if entry.active { "active  " } else { "inactive" },
                    entry.item.duration_seconds,
                    if entry.item.is_continuous { "[live] " } else { "" },
                    entry.item.title,
                    entry.item.locator.as_str(),
                );
            }
        }
        Command::Now {
            channel,
            stream_base,
        } => {
            let now_playing = now_playing_at(&db, &channel, clock.now(), &stream_base)?
                .with_context(|| format!("no channel named {channel}"))?;
            println!("{}", serde_json::to_string_pretty(&now_playing)?);
        }
    }

    Ok(())
}
