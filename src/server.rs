use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, instrument};
use warp::filters::BoxedFilter;
use warp::path::Tail;
use warp::reply::Response;
use warp::{Filter, Reply};

use crate::clock::Clock;
use crate::db::Database;
use crate::error::Result;
use crate::schedule;
use crate::server::types::{ApiError, NowPlaying, StreamReply};
use crate::stream::{decode_path, CachePolicy, MediaStore};

pub mod types;

/// Everything a request handler needs. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub store: MediaStore,
    pub clock: Arc<dyn Clock>,
    pub cache: CachePolicy,
    pub stream_base: String,
}

/// Evaluate the schedule of `slug` at `now`. `None` means the channel does not exist.
pub fn now_playing_at(
    db: &Database,
    slug: &str,
    now: DateTime<Utc>,
    stream_base: &str,
) -> Result<Option<NowPlaying>> {
    let Some(channel) = db.channel(slug)? else {
        return Ok(None);
    };
    let snapshot = db.snapshot(slug)?;
    let decision = schedule::compute(&snapshot, channel.schedule_start, now);

    Ok(Some(NowPlaying::new(
        &channel,
        &snapshot,
        decision,
        now,
        stream_base,
    )))
}

pub fn make_server(state: AppState) -> BoxedFilter<(impl Reply,)> {
    let with_state = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let now = warp::path!("channel" / String / "now")
        .and(with_state.clone())
        .and_then(now_playing);

    let stream = warp::path("stream")
        .and(warp::path::tail())
        .and(warp::header::optional::<String>("range"))
        .and(with_state)
        .and_then(stream_media);

    warp::get()
        .and(now.or(stream).unify())
        .with(warp::trace::request())
        .boxed()
}

#[instrument(skip(state))]
async fn now_playing(slug: String, state: AppState) -> std::result::Result<Response, Infallible> {
    let now = state.clock.now();

    // rusqlite blocks; keep it off the threads driving open streams.
    let AppState {
        db, stream_base, ..
    } = state;
    let evaluated =
        tokio::task::spawn_blocking(move || now_playing_at(&db, &slug, now, &stream_base)).await;

    let reply = match evaluated {
        Ok(Ok(Some(now_playing))) => now_playing.into_response(),
        Ok(Ok(None)) => ApiError::NotFound.into_response(),
        Ok(Err(err)) => {
            error!(error = %err, "failed to evaluate channel schedule");
            ApiError::Internal.into_response()
        }
        Err(err) => {
            error!(error = %err, "schedule evaluation task failed");
            ApiError::Internal.into_response()
        }
    };

    Ok(reply)
}

#[instrument(skip(tail, state), fields(path = tail.as_str()))]
async fn stream_media(
    tail: Tail,
    range: Option<String>,
    state: AppState,
) -> std::result::Result<Response, Infallible> {
    let Some(path) = decode_path(tail.as_str()) else {
        return Ok(ApiError::NotFound.into_response());
    };
    let Some(resource) = state.store.open(&path).await else {
        return Ok(ApiError::NotFound.into_response());
    };

    let reply = match resource.into_outcome(range.as_deref()).await {
        Ok(outcome) => StreamReply {
            outcome,
            cache: state.cache,
        }
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to prepare media stream");
            ApiError::Internal.into_response()
        }
    };

    Ok(reply)
}
