use warp::http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;
use warp::Reply;

use crate::server::types::{ApiError, ErrorBody, NowPlaying, StreamReply};
use crate::stream::StreamOutcome;

impl Reply for NowPlaying {
    fn into_response(self) -> Response {
        let mut response = warp::reply::json(&self).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found"),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };
        let body = ErrorBody {
            error: message.to_string(),
        };

        warp::reply::with_status(warp::reply::json(&body), status).into_response()
    }
}

impl Reply for StreamReply {
    fn into_response(self) -> Response {
        let (status, body, content_type, length, content_range) = match self.outcome {
            StreamOutcome::Full {
                size,
                content_type,
                body,
            } => (StatusCode::OK, body, Some(content_type), size, None),
            StreamOutcome::Partial {
                range,
                content_type,
                body,
            } => (
                StatusCode::PARTIAL_CONTENT,
                body,
                Some(content_type),
                range.len(),
                Some(range.content_range()),
            ),
            StreamOutcome::Unsatisfiable { size } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                Body::empty(),
                None,
                0,
                Some(format!("bytes */{size}")),
            ),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Some(Ok(value)) = content_range.map(HeaderValue::try_from) {
            headers.insert(CONTENT_RANGE, value);
        }
        if let Ok(value) = HeaderValue::try_from(self.cache.header_value()) {
            headers.insert(CACHE_CONTROL, value);
        }

        response
    }
}
