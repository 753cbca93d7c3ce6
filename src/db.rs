use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::error::{Error, Result};
use crate::media::{Locator, MediaItem, NewMediaItem};
use crate::playlist::{Channel, PlaylistEntry, PlaylistSnapshot};

/// Database for channels, published media items and their playlist placement.
///
/// The scheduler only ever reads from here; everything that writes is the
/// publishing side or an operator.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<rusqlite::Connection>>,
}

impl Database {
    pub fn memory() -> Result<Self> {
        // Construct a new SQLite database in-memory.
        let db = rusqlite::Connection::open_in_memory()?;
        setup_connection(&db)?;

        let db = Arc::new(Mutex::new(db));
        Ok(Self { inner: db })
    }

    pub fn file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let db = rusqlite::Connection::open(file)?;
        setup_connection(&db)?;

        let db = Arc::new(Mutex::new(db));
        Ok(Self { inner: db })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.inner.lock().map_err(|_| Error::Poisoned)
    }
}

// Channels
impl Database {
    /// Fetch a channel, creating it with its anchor at `now` if it does not exist yet.
    /// An existing channel keeps its anchor.
    pub fn ensure_channel(&self, slug: &str, name: &str, now: DateTime<Utc>) -> Result<Channel> {
        let db = self.conn()?;

        let created = db.execute(
            "INSERT OR IGNORE INTO channels (slug, name, schedule_start) VALUES (?1, ?2, ?3)",
            params![slug, name, now],
        )?;
        if created > 0 {
            info!(slug, anchor = %now, "created channel");
        }

        query_channel(&db, slug)?.ok_or_else(|| Error::ChannelNotFound(slug.to_string()))
    }

    pub fn channel(&self, slug: &str) -> Result<Option<Channel>> {
        let db = self.conn()?;
        query_channel(&db, slug)
    }

    pub fn channel_anchor(&self, slug: &str) -> Result<DateTime<Utc>> {
        self.channel(slug)?
            .map(|channel| channel.schedule_start)
            .ok_or_else(|| Error::ChannelNotFound(slug.to_string()))
    }

    /// Move a channel's anchor. Every viewer's position jumps when this runs,
    /// so it is only exposed to operators.
    pub fn reset_anchor(&self, slug: &str, at: DateTime<Utc>) -> Result<Channel> {
        let db = self.conn()?;

        let updated = db.execute(
            "UPDATE channels SET schedule_start = ?2 WHERE slug = ?1",
            params![slug, at],
        )?;
        if updated == 0 {
            return Err(Error::ChannelNotFound(slug.to_string()));
        }
        info!(slug, anchor = %at, "reset channel anchor");

        query_channel(&db, slug)?.ok_or_else(|| Error::ChannelNotFound(slug.to_string()))
    }
}

// Media items and playlist entries
impl Database {
    pub fn insert_item(&self, item: NewMediaItem) -> Result<MediaItem> {
        let db = self.conn()?;

        let duration_seconds = item.resolved_duration();
        let is_continuous = item.resolved_continuous();
        db.execute(
            "INSERT INTO media_items (title, duration_seconds, locator_kind, locator, is_continuous) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                item.title,
                duration_seconds as i64,
                item.locator.kind(),
                item.locator.as_str(),
                is_continuous
            ],
        )?;

        Ok(MediaItem {
            id: db.last_insert_rowid(),
            title: item.title,
            duration_seconds,
            locator: item.locator,
            is_continuous,
        })
    }

    /// Append an item to the end of a channel's rotation.
    pub fn publish_append(&self, slug: &str, item_id: i64) -> Result<i64> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        if query_channel(&tx, slug)?.is_none() {
            return Err(Error::ChannelNotFound(slug.to_string()));
        }
        let exists: Option<i64> = tx
            .query_row("SELECT id FROM media_items WHERE id = ?1", [item_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(Error::ItemNotFound(item_id));
        }

        let max_key: Option<i64> = tx.query_row(
            "SELECT MAX(sort_key) FROM playlist_entries WHERE channel = ?1",
            [slug],
            |row| row.get(0),
        )?;
        let sort_key = max_key.unwrap_or(0) + 1;

        tx.execute(
            "INSERT INTO playlist_entries (channel, item_id, sort_key, active) VALUES (?1, ?2, ?3, 1)",
            params![slug, item_id, sort_key],
        )?;
        let entry_id = tx.last_insert_rowid();
        tx.commit()?;

        info!(slug, item_id, entry_id, sort_key, "published item to channel");
        Ok(entry_id)
    }

    pub fn deactivate_entry(&self, entry_id: i64) -> Result<()> {
        let db = self.conn()?;

        let updated = db.execute(
            "UPDATE playlist_entries SET active = 0 WHERE id = ?1",
            [entry_id],
        )?;
        if updated == 0 {
            return Err(Error::EntryNotFound(entry_id));
        }

        Ok(())
    }

    pub fn set_sort_key(&self, entry_id: i64, sort_key: i64) -> Result<()> {
        let db = self.conn()?;

        let updated = db.execute(
            "UPDATE playlist_entries SET sort_key = ?2 WHERE id = ?1",
            params![entry_id, sort_key],
        )?;
        if updated == 0 {
            return Err(Error::EntryNotFound(entry_id));
        }

        Ok(())
    }

    /// All entries of a channel, active or not, in rotation order.
    pub fn entries(&self, slug: &str) -> Result<Vec<PlaylistEntry>> {
        self.query_entries(slug, false)
    }

    /// Active entries of a channel in rotation order, read in a single statement.
    pub fn active_entries(&self, slug: &str) -> Result<Vec<PlaylistEntry>> {
        self.query_entries(slug, true)
    }

    pub fn snapshot(&self, slug: &str) -> Result<PlaylistSnapshot> {
        self.active_entries(slug).map(PlaylistSnapshot::from_entries)
    }

    fn query_entries(&self, slug: &str, active_only: bool) -> Result<Vec<PlaylistEntry>> {
        let db = self.conn()?;

        let mut stmt = db.prepare(
            "SELECT e.id, e.sort_key, e.active, \
                    m.id, m.title, m.duration_seconds, m.locator_kind, m.locator, m.is_continuous \
             FROM playlist_entries e JOIN media_items m ON m.id = e.item_id \
             WHERE e.channel = ?1 AND (?2 = 0 OR e.active = 1) \
             ORDER BY e.sort_key, e.id",
        )?;

        let rows = stmt
            .query_map(params![slug, active_only], |row| {
                Ok(PlaylistEntry {
                    id: row.get(0)?,
                    sort_key: row.get(1)?,
                    active: row.get(2)?,
                    item: item_from_offset(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}

fn query_channel(db: &rusqlite::Connection, slug: &str) -> Result<Option<Channel>> {
    db.query_row(
        "SELECT slug, name, schedule_start FROM channels WHERE slug = ?1",
        [slug],
        |row| {
            Ok(Channel {
                slug: row.get(0)?,
                name: row.get(1)?,
                schedule_start: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

fn item_from_offset(row: &Row<'_>, offset: usize) -> rusqlite::Result<MediaItem> {
    let duration: i64 = row.get(offset + 2)?;
    let kind: String = row.get(offset + 3)?;
    let locator: String = row.get(offset + 4)?;
    let locator = match kind.as_str() {
        "remote" => Locator::Remote(locator),
        _ => Locator::Local(locator),
    };

    Ok(MediaItem {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        duration_seconds: crate::media::clamp_duration(duration),
        locator,
        is_continuous: row.get(offset + 5)?,
    })
}

fn setup_connection(db: &rusqlite::Connection) -> Result<()> {
    db.execute_batch(
        r#"
            CREATE TABLE IF NOT EXISTS channels (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schedule_start DATETIME NOT NULL
            );
            CREATE TABLE IF NOT EXISTS media_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                locator_kind TEXT NOT NULL,
                locator TEXT NOT NULL,
                is_continuous INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS playlist_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL REFERENCES channels(slug),
                item_id INTEGER NOT NULL REFERENCES media_items(id),
                sort_key INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS playlist_entries_channel
                ON playlist_entries (channel, sort_key, id);
            "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::ops::Add;
    use std::str::FromStr;

    use chrono::{DateTime, TimeDelta, Utc};

    use crate::db::Database;
    use crate::error::Error;
    use crate::media::{Locator, NewMediaItem, MAX_DURATION_SECONDS};

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_str("2000-01-01 00:00:00Z").unwrap()
    }

    fn new_item(title: &str, duration: i64, locator: &str) -> NewMediaItem {
        NewMediaItem {
            title: title.to_string(),
            duration_seconds: Some(duration),
            locator: Locator::parse(locator),
            is_continuous: None,
        }
    }

    #[test]
    pub fn test_init() {
        let db = Database::memory().unwrap();
        let db = db.inner.lock().unwrap();
        let count: usize = db
            .query_row_and_then("select count(*) as counter FROM playlist_entries", [], |row| {
                row.get(0)
            })
            .unwrap();

        assert_eq!(count, 0);
    }

    #[test]
    pub fn test_ensure_channel_keeps_anchor() {
        let db = Database::memory().unwrap();

        let created = db.ensure_channel("main", "Main", t0()).unwrap();
        assert_eq!(created.schedule_start, t0());

        let again = db
            .ensure_channel("main", "Main", t0().add(TimeDelta::hours(5)))
            .unwrap();
        assert_eq!(again.schedule_start, t0());
        assert_eq!(db.channel_anchor("main").unwrap(), t0());
    }

    #[test]
    pub fn test_reset_anchor() {
        let db = Database::memory().unwrap();
        db.ensure_channel("main", "Main", t0()).unwrap();

        let later = t0().add(TimeDelta::days(2));
        assert_eq!(db.reset_anchor("main", later).unwrap().schedule_start, later);
        assert_eq!(db.channel_anchor("main").unwrap(), later);

        assert!(matches!(
            db.reset_anchor("missing", later),
            Err(Error::ChannelNotFound(_))
        ));
    }

    #[test]
    pub fn test_publish_and_order() {
        let db = Database::memory().unwrap();
        db.ensure_channel("main", "Main", t0()).unwrap();

        let a = db.insert_item(new_item("a", 30, "a.mp4")).unwrap();
        let b = db.insert_item(new_item("b", 60, "b.mp4")).unwrap();
        let c = db.insert_item(new_item("c", 10, "https://cdn.example.com/c.mp4")).unwrap();

        let ea = db.publish_append("main", a.id).unwrap();
        let eb = db.publish_append("main", b.id).unwrap();
        let ec = db.publish_append("main", c.id).unwrap();

        let keys: Vec<i64> = db.entries("main").unwrap().iter().map(|e| e.sort_key).collect();
        assert_eq!(keys, vec![1, 2, 3]);

        db.set_sort_key(ec, 0).unwrap();
        db.deactivate_entry(eb).unwrap();

        let active = db.active_entries("main").unwrap();
        let ids: Vec<i64> = active.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![ec, ea]);
        assert_eq!(
            active[0].item.locator,
            Locator::Remote("https://cdn.example.com/c.mp4".to_string())
        );

        assert_eq!(db.entries("main").unwrap().len(), 3);
        assert_eq!(db.snapshot("main").unwrap().item_ids(), vec![c.id, a.id]);
    }

    #[test]
    pub fn test_publish_clamps_and_classifies() {
        let db = Database::memory().unwrap();
        db.ensure_channel("main", "Main", t0()).unwrap();

        let live = db.insert_item(new_item("zero", 0, "live/feed.m3u8")).unwrap();
        assert_eq!(live.duration_seconds, 1);
        assert!(live.is_continuous);

        let huge = db.insert_item(new_item("huge", i64::MAX, "huge.mp4")).unwrap();
        assert_eq!(huge.duration_seconds, MAX_DURATION_SECONDS);

        db.publish_append("main", live.id).unwrap();
        db.publish_append("main", huge.id).unwrap();
        let stored: Vec<_> = db.entries("main").unwrap().into_iter().map(|e| e.item).collect();
        assert_eq!(stored, vec![live, huge]);
    }

    #[test]
    pub fn test_publish_errors() {
        let db = Database::memory().unwrap();
        let item = db.insert_item(new_item("a", 30, "a.mp4")).unwrap();

        assert!(matches!(
            db.publish_append("missing", item.id),
            Err(Error::ChannelNotFound(_))
        ));

        db.ensure_channel("main", "Main", t0()).unwrap();
        assert!(matches!(
            db.publish_append("main", 999),
            Err(Error::ItemNotFound(999))
        ));
        assert!(matches!(db.deactivate_entry(42), Err(Error::EntryNotFound(42))));
        assert!(matches!(db.set_sort_key(42, 1), Err(Error::EntryNotFound(42))));
    }
}
