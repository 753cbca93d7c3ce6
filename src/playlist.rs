use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaItem;

/// A named rotation and the anchor its broadcast clock is measured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub slug: String,
    pub name: String,
    pub schedule_start: DateTime<Utc>,
}

/// Placement of a [MediaItem] inside a channel's rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub id: i64,
    pub sort_key: i64,
    pub active: bool,
    pub item: MediaItem,
}

/// Consistent, ordered copy of a channel's active entries.
///
/// Built once per evaluation so that concurrent appends or deactivations
/// cannot change the rotation halfway through a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistSnapshot {
    entries: Vec<PlaylistEntry>,
}

impl PlaylistSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = PlaylistEntry>) -> Self {
        let mut entries: Vec<PlaylistEntry> = entries.into_iter().filter(|e| e.active).collect();
        entries.sort_by_key(|e| (e.sort_key, e.id));

        Self { entries }
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn item_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.item.id).collect()
    }
}

#[cfg(test)]
mod test {
    use crate::media::{Locator, MediaItem};
    use crate::playlist::{PlaylistEntry, PlaylistSnapshot};

    fn entry(id: i64, sort_key: i64, active: bool) -> PlaylistEntry {
        PlaylistEntry {
            id,
            sort_key,
            active,
            item: MediaItem {
                id: id * 10,
                title: format!("item {id}"),
                duration_seconds: 30,
                locator: Locator::Local(format!("{id}.mp4")),
                is_continuous: false,
            },
        }
    }

    #[test]
    pub fn test_snapshot_filters_and_orders() {
        let snapshot = PlaylistSnapshot::from_entries(vec![
            entry(4, 2, true),
            entry(1, 3, true),
            entry(3, 2, true),
            entry(2, 1, false),
        ]);

        let ids: Vec<i64> = snapshot.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 1]);
        assert_eq!(snapshot.item_ids(), vec![30, 40, 10]);
    }
}
