use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Smallest duration an item is scheduled with. Zero or missing durations are
/// clamped up to this so a cycle can never have a zero length.
pub const MIN_DURATION_SECONDS: u64 = 1;

/// Largest duration an item is scheduled with (ten years).
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Characters left as-is inside one URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Clamp a raw duration to something the scheduler can divide by and sum.
pub fn clamp_duration(seconds: i64) -> u64 {
    (seconds.max(0) as u64).clamp(MIN_DURATION_SECONDS, MAX_DURATION_SECONDS)
}

/// Where the bytes of a [MediaItem] live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// Absolute URL on some other origin. No byte-range guarantee.
    Remote(String),
    /// Path relative to the configured media root, served by the range server.
    Local(String),
}

impl Locator {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Locator::Remote(value.to_string())
        } else {
            Locator::Local(value.trim_start_matches('/').to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Remote(_) => "remote",
            Locator::Local(_) => "local",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Locator::Remote(url) => url.as_str(),
            Locator::Local(path) => path.as_str(),
        }
    }

    /// Segmented live playlists (HLS) have no fixed duration to schedule against.
    /// Only consulted at publish time; the result is stored on the item.
    pub fn looks_continuous(&self) -> bool {
        let path = self.as_str();
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.to_ascii_lowercase().ends_with(".m3u8")
    }

    /// URL a client should request to play this locator.
    pub fn play_url(&self, stream_base: &str) -> String {
        match self {
            Locator::Remote(url) => url.clone(),
            Locator::Local(path) => {
                let encoded: Vec<String> = path
                    .split('/')
                    .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
                    .collect();
                format!("{}/{}", stream_base.trim_end_matches('/'), encoded.join("/"))
            }
        }
    }
}

/// Immutable-once-published content unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub title: String,
    pub duration_seconds: u64,
    pub locator: Locator,
    pub is_continuous: bool,
}

impl MediaItem {
    /// Duration as the scheduler sees it, clamped again in case the value
    /// was built by hand rather than through the publishing path.
    pub fn scheduled_duration(&self) -> u64 {
        self.duration_seconds
            .clamp(MIN_DURATION_SECONDS, MAX_DURATION_SECONDS)
    }
}

/// Input to the publishing step. Anything left unset is resolved once here
/// instead of on every schedule evaluation.
#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub title: String,
    pub duration_seconds: Option<i64>,
    pub locator: Locator,
    pub is_continuous: Option<bool>,
}

impl NewMediaItem {
    pub fn resolved_duration(&self) -> u64 {
        clamp_duration(self.duration_seconds.unwrap_or(0))
    }

    pub fn resolved_continuous(&self) -> bool {
        self.is_continuous
            .unwrap_or_else(|| self.locator.looks_continuous())
    }
}
