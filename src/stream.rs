//! Byte-range media serving from a local storage root.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use percent_encoding::percent_decode_str;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use warp::hyper::body::Bytes;
use warp::hyper::Body;

use crate::error::Result;
use crate::range::{resolve_header, ByteRange, RangeError};

/// Size of each read pulled from disk while streaming a body.
pub const CHUNK_SIZE: usize = 8192;

/// Whether stream responses may be reused by caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Bytes are consulted against a moving schedule; never cache.
    NoStore,
    /// Archival content, cacheable for the given number of seconds.
    MaxAge(u64),
}

impl CachePolicy {
    pub fn from_max_age(max_age: Option<u64>) -> Self {
        max_age.map(CachePolicy::MaxAge).unwrap_or(CachePolicy::NoStore)
    }

    pub fn header_value(&self) -> String {
        match self {
            CachePolicy::NoStore => "no-store".to_string(),
            CachePolicy::MaxAge(seconds) => format!("public, max-age={seconds}"),
        }
    }
}

/// Media type for a file, keyed on its extension.
pub fn content_type_for(path: impl AsRef<Path>) -> &'static str {
    let extension = path
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("m4v") => "video/x-m4v",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("ts") => "video/MP2T",
        Some("m3u8") => "application/x-mpegURL",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("vtt") => "text/vtt",
        Some("srt") => "application/x-subrip",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Decode a percent-encoded request path one segment at a time.
///
/// A segment that decodes to a separator or NUL, or to invalid UTF-8, makes the
/// whole path unresolvable.
pub fn decode_path(raw: &str) -> Option<String> {
    let segments = raw
        .split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8().ok()?;
            if decoded.contains(['/', '\\', '\0']) {
                return None;
            }
            Some(decoded.into_owned())
        })
        .collect::<Option<Vec<_>>>()?;

    Some(segments.join("/"))
}

/// Files under a single storage root.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    open_streams: Arc<AtomicUsize>,
}

/// An opened file ready to be streamed.
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub file: File,
    pub size: u64,
    pub content_type: &'static str,
    open_streams: Arc<AtomicUsize>,
}

impl MediaStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;

        Ok(Self {
            root,
            open_streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of response bodies currently holding a file open.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied relative path to a file inside the root.
    ///
    /// Returns `None` for anything that does not exist, is not a regular file,
    /// or resolves (including through symlinks) to somewhere outside the root.
    pub async fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            warn!(path = %relative.display(), "rejecting non-normal media path");
            return None;
        }

        let resolved = tokio::fs::canonicalize(self.root.join(relative)).await.ok()?;
        if !resolved.starts_with(&self.root) {
            warn!(path = %relative.display(), "media path escapes storage root");
            return None;
        }

        let metadata = tokio::fs::metadata(&resolved).await.ok()?;
        metadata.is_file().then_some(resolved)
    }

    pub async fn open(&self, relative: &str) -> Option<Resource> {
        let path = self.resolve(relative).await?;
        let file = File::open(&path).await.ok()?;
        let size = file.metadata().await.ok()?.len();

        Some(Resource {
            name: relative.to_string(),
            file,
            size,
            content_type: content_type_for(&path),
            open_streams: Arc::clone(&self.open_streams),
        })
    }
}

/// What a request for a resource turns into once its `Range` header is applied.
pub enum StreamOutcome {
    Full {
        size: u64,
        content_type: &'static str,
        body: Body,
    },
    Partial {
        range: ByteRange,
        content_type: &'static str,
        body: Body,
    },
    Unsatisfiable {
        size: u64,
    },
}

impl Resource {
    /// Apply an optional `Range` header. A present but malformed header is
    /// answered as unsatisfiable rather than falling back to the full body.
    pub async fn into_outcome(self, range_header: Option<&str>) -> std::io::Result<StreamOutcome> {
        let Some(header) = range_header else {
            let size = self.size;
            let content_type = self.content_type;
            let body = self.window_body(0, size).await?;
            return Ok(StreamOutcome::Full {
                size,
                content_type,
                body,
            });
        };

        match resolve_header(header, self.size) {
            Ok(range) => {
                let content_type = self.content_type;
                let body = self.window_body(range.start, range.len()).await?;
                Ok(StreamOutcome::Partial {
                    range,
                    content_type,
                    body,
                })
            }
            Err(err) => {
                debug!(resource = %self.name, range = header, error = %err, "refusing range");
                let size = match err {
                    RangeError::Unsatisfiable { size } => size,
                    RangeError::Malformed => self.size,
                };
                Ok(StreamOutcome::Unsatisfiable { size })
            }
        }
    }

    async fn window_body(self, start: u64, length: u64) -> std::io::Result<Body> {
        self.window_stream(start, length).await.map(Body::wrap_stream)
    }

    async fn window_stream(mut self, start: u64, length: u64) -> std::io::Result<WindowStream> {
        if start > 0 {
            self.file.seek(SeekFrom::Start(start)).await?;
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(WindowStream {
            inner: ReaderStream::with_capacity(self.file.take(length), CHUNK_SIZE),
            name: self.name,
            sent: 0,
            expected: length,
            open_streams: self.open_streams,
        })
    }
}

/// Chunked reader over one byte window. Dropped, along with its file handle,
/// as soon as the client connection goes away.
struct WindowStream {
    inner: ReaderStream<Take<File>>,
    name: String,
    sent: u64,
    expected: u64,
    open_streams: Arc<AtomicUsize>,
}

impl Stream for WindowStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let res = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(ref chunk))) = res {
            self.sent += chunk.len() as u64;
        }
        res
    }
}

impl Drop for WindowStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
        if self.sent < self.expected {
            debug!(
                resource = %self.name,
                sent = self.sent,
                expected = self.expected,
                "stream closed before window was complete"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use futures::StreamExt;

    use super::*;

    fn store_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, MediaStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::File::create(path).unwrap().write_all(data).unwrap();
        }
        let store = MediaStore::new(dir.path()).unwrap();

        (dir, store)
    }

    #[test]
    pub fn test_content_type() {
        assert_eq!(content_type_for("a/b/clip.MP4"), "video/mp4");
        assert_eq!(content_type_for("clip.webm"), "video/webm");
        assert_eq!(content_type_for("clip.unknown"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }

    #[test]
    pub fn test_decode_path() {
        assert_eq!(decode_path("videos/my%20clip.mp4").as_deref(), Some("videos/my clip.mp4"));
        assert_eq!(decode_path("vid%C3%A9o.mp4").as_deref(), Some("vidéo.mp4"));
        assert_eq!(decode_path("%2e%2e/secret").as_deref(), Some("../secret"));
        assert_eq!(decode_path("a%2Fb.mp4"), None);
        assert_eq!(decode_path("a%5Cb.mp4"), None);
        assert_eq!(decode_path("a%00.mp4"), None);
        assert_eq!(decode_path("%FF.mp4"), None);
    }

    #[test]
    pub fn test_cache_policy() {
        assert_eq!(CachePolicy::from_max_age(None).header_value(), "no-store");
        assert_eq!(
            CachePolicy::from_max_age(Some(600)).header_value(),
            "public, max-age=600"
        );
    }

    #[tokio::test]
    pub async fn test_resolve_inside_root() {
        let (_dir, store) = store_with(&[("videos/a.mp4", &b"data"[..])]);

        let resolved = store.resolve("videos/a.mp4").await.unwrap();
        assert!(resolved.starts_with(store.root()));
        assert!(store.resolve("videos/missing.mp4").await.is_none());
        assert!(store.resolve("videos").await.is_none());
    }

    #[tokio::test]
    pub async fn test_resolve_rejects_escape() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
        std::fs::create_dir(outer.path().join("media")).unwrap();
        let store = MediaStore::new(outer.path().join("media")).unwrap();

        assert!(store.resolve("../secret.txt").await.is_none());
        assert!(store.resolve("/etc/passwd").await.is_none());
        assert!(store.resolve("").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    pub async fn test_resolve_rejects_symlink_escape() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
        std::fs::create_dir(outer.path().join("media")).unwrap();
        std::os::unix::fs::symlink(
            outer.path().join("secret.txt"),
            outer.path().join("media").join("link.mp4"),
        )
        .unwrap();
        let store = MediaStore::new(outer.path().join("media")).unwrap();

        assert!(store.resolve("link.mp4").await.is_none());
    }

    #[tokio::test]
    pub async fn test_outcomes() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let (_dir, store) = store_with(&[("clip.mp4", &data[..])]);

        let resource = store.open("clip.mp4").await.unwrap();
        match resource.into_outcome(None).await.unwrap() {
            StreamOutcome::Full { size, content_type, .. } => {
                assert_eq!(size, 1000);
                assert_eq!(content_type, "video/mp4");
            }
            _ => panic!("expected full outcome"),
        }

        let resource = store.open("clip.mp4").await.unwrap();
        match resource.into_outcome(Some("bytes=500-1500")).await.unwrap() {
            StreamOutcome::Partial { range, body, .. } => {
                assert_eq!(range.content_range(), "bytes 500-999/1000");
                let bytes = warp::hyper::body::to_bytes(body).await.unwrap();
                assert_eq!(&bytes[..], &data[500..]);
            }
            _ => panic!("expected partial outcome"),
        }

        let resource = store.open("clip.mp4").await.unwrap();
        assert!(matches!(
            resource.into_outcome(Some("bytes=nope")).await.unwrap(),
            StreamOutcome::Unsatisfiable { size: 1000 }
        ));
    }

    fn large_clip() -> Vec<u8> {
        (0..64 * 1024u32).map(|i| (i % 253) as u8).collect()
    }

    #[tokio::test]
    pub async fn test_body_arrives_in_bounded_chunks() {
        let data = large_clip();
        let (_dir, store) = store_with(&[("large.mp4", &data[..])]);

        let resource = store.open("large.mp4").await.unwrap();
        let mut body = match resource.into_outcome(None).await.unwrap() {
            StreamOutcome::Full { body, .. } => body,
            _ => panic!("expected full outcome"),
        };

        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= CHUNK_SIZE, "chunk of {} bytes", chunk.len());
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    pub async fn test_interior_offset_window() {
        let data = large_clip();
        let (_dir, store) = store_with(&[("large.mp4", &data[..])]);

        let resource = store.open("large.mp4").await.unwrap();
        match resource.into_outcome(Some("bytes=40000-")).await.unwrap() {
            StreamOutcome::Partial { range, body, .. } => {
                assert_eq!(range.start, 40000);
                assert_eq!(range.end, data.len() as u64 - 1);
                let bytes = warp::hyper::body::to_bytes(body).await.unwrap();
                assert_eq!(&bytes[..], &data[40000..]);
            }
            _ => panic!("expected partial outcome"),
        }
    }

    #[tokio::test]
    pub async fn test_dropped_body_releases_file() {
        let data = large_clip();
        let (_dir, store) = store_with(&[("large.mp4", &data[..])]);

        let resource = store.open("large.mp4").await.unwrap();
        let mut stream = resource.window_stream(0, data.len() as u64).await.unwrap();
        assert_eq!(store.open_streams(), 1);

        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        assert!(first.len() <= CHUNK_SIZE);
        assert_eq!(&first[..], &data[..first.len()]);
        assert!(stream.sent < stream.expected);

        drop(stream);
        assert_eq!(store.open_streams(), 0);

        let resource = store.open("large.mp4").await.unwrap();
        let body = match resource.into_outcome(Some("bytes=0-")).await.unwrap() {
            StreamOutcome::Partial { body, .. } => body,
            _ => panic!("expected partial outcome"),
        };
        assert_eq!(store.open_streams(), 1);
        drop(body);
        assert_eq!(store.open_streams(), 0);
    }
}
