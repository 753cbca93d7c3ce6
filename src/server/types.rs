use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playlist::{Channel, PlaylistSnapshot};
use crate::schedule::ScheduleDecision;
use crate::stream::{CachePolicy, StreamOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowItem {
    pub id: i64,
    pub title: String,
    pub locator: String,
    pub is_live_feed: bool,
    pub duration_seconds: u64,
}

/// Body of `GET /channel/{slug}/now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub channel: String,
    pub server_time: DateTime<Utc>,
    pub item: Option<NowItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_total_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_position_seconds: Option<u64>,
    #[serde(default)]
    pub playlist: Vec<i64>,
}

impl NowPlaying {
    pub fn new(
        channel: &Channel,
        snapshot: &PlaylistSnapshot,
        decision: Option<ScheduleDecision<'_>>,
        now: DateTime<Utc>,
        stream_base: &str,
    ) -> Self {
        let Some(decision) = decision else {
            return Self {
                channel: channel.slug.clone(),
                server_time: now,
                item: None,
                offset_seconds: None,
                cycle_total_seconds: None,
                cycle_position_seconds: None,
                playlist: Vec::new(),
            };
        };

        let item = &decision.entry.item;
        Self {
            channel: channel.slug.clone(),
            server_time: now,
            item: Some(NowItem {
                id: item.id,
                title: item.title.clone(),
                locator: item.locator.play_url(stream_base),
                is_live_feed: item.is_continuous,
                duration_seconds: item.duration_seconds,
            }),
            offset_seconds: Some(decision.offset_seconds),
            cycle_total_seconds: Some(decision.cycle_total_seconds),
            cycle_position_seconds: Some(decision.cycle_position_seconds),
            playlist: snapshot.item_ids(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failures the HTTP surface reports. Internal details are logged, not returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound,
    Internal,
}

pub struct StreamReply {
    pub outcome: StreamOutcome,
    pub cache: CachePolicy,
}
