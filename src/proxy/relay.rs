use crate::cache::{ProxyCache, BROWSER_USER_AGENT};
use crate::error::RelayError;
use crate::stream::{bounded_chunks, CHUNK_SIZE};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{
    HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
    USER_AGENT,
};
use hyper::{Response, StatusCode};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

pub type RelayBody = UnsyncBoxBody<Bytes, io::Error>;

/// Time allowed for the origin to start answering. The body transfer itself
/// is unbounded.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_AUDIO_TYPE: &str = "audio/mpeg";
const AUDIO_ACCEPT: &str =
    "audio/webm,audio/ogg,audio/wav,audio/*;q=0.9,application/ogg;q=0.7,video/*;q=0.6,*/*;q=0.5";

pub fn full_body(data: impl Into<Bytes>) -> RelayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn text_response(status: StatusCode, body: &'static str) -> Response<RelayBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Streams origin audio for a handle without revealing the origin URL.
#[derive(Clone)]
pub struct StreamRelay {
    cache: Arc<ProxyCache>,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl StreamRelay {
    pub fn new(cache: Arc<ProxyCache>, client: reqwest::Client) -> Self {
        Self {
            cache,
            client,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub async fn serve(&self, handle: &str, range: Option<&HeaderValue>) -> Response<RelayBody> {
        match self.stream(handle, range).await {
            Ok(response) => response,
            Err(RelayError::NotFound) => {
                debug!(handle, "relay miss");
                text_response(StatusCode::NOT_FOUND, RelayError::NotFound.body())
            }
            Err(e) => {
                error!(handle, error = %e, "relay failed");
                text_response(e.status(), e.body())
            }
        }
    }

    pub async fn stream(
        &self,
        handle: &str,
        range: Option<&HeaderValue>,
    ) -> Result<Response<RelayBody>, RelayError> {
        let origin_url = self.cache.resolve(handle).await.ok_or(RelayError::NotFound)?;

        let mut request = self
            .client
            .get(&origin_url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, AUDIO_ACCEPT)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(ACCEPT_ENCODING, "identity");
        if let Some(range) = range {
            request = request.header(RANGE, range.clone());
        }

        let origin = match timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(RelayError::Origin(e.to_string())),
            Err(_) => return Err(RelayError::Origin("origin timed out".into())),
        };

        let status = origin.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(RelayError::Origin(format!("origin answered {status}")));
        }

        let headers = origin.headers();
        let mut builder = Response::builder()
            .status(status)
            .header(
                CONTENT_TYPE,
                headers
                    .get(CONTENT_TYPE)
                    .cloned()
                    .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_AUDIO_TYPE)),
            )
            .header(ACCEPT_RANGES, "bytes")
            .header(CACHE_CONTROL, "public, max-age=3600")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Range");
        if let Some(length) = headers.get(CONTENT_LENGTH) {
            builder = builder.header(CONTENT_LENGTH, length.clone());
        }
        if let Some(content_range) = headers.get(CONTENT_RANGE) {
            builder = builder.header(CONTENT_RANGE, content_range.clone());
        }

        // Dropping the body (client gone) drops the origin stream with it,
        // which releases the outbound connection.
        let handle_owned = handle.to_string();
        let chunks = bounded_chunks(origin.bytes_stream(), CHUNK_SIZE)
            .inspect_err(move |e| warn!(handle = %handle_owned, error = %e, "origin stream broke mid-relay"))
            .map_ok(Frame::data);

        Ok(builder.body(StreamBody::new(chunks).boxed_unsync())?)
    }
}
