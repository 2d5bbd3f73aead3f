use super::relay::{full_body, text_response, RelayBody, StreamRelay};
use crate::cache::ProxyCache;
use crate::resolver::OriginResolver;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, HOST, RANGE,
};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const STREAM_PREFIX: &str = "/proxy/stream/";
const DEFAULT_OWNER: &str = "public";

/// Everything a request handler needs, shared by all connections.
pub struct AppState {
    pub cache: Arc<ProxyCache>,
    pub relay: StreamRelay,
    pub resolver: Option<Arc<OriginResolver>>,
    pub public_url: Option<String>,
}

pub type SharedState = Arc<AppState>;

pub async fn handle_request<B>(req: Request<B>, state: SharedState) -> Response<RelayBody> {
    // only GETs are served; the request body is never read
    let (req, _) = req.into_parts();
    let path = req.uri.path().to_string();

    if let Some(handle) = path.strip_prefix(STREAM_PREFIX) {
        if handle.is_empty() || handle.contains('/') {
            return text_response(StatusCode::NOT_FOUND, "Stream not found or expired");
        }
        return match req.method {
            Method::GET => state.relay.serve(handle, req.headers.get(RANGE)).await,
            Method::OPTIONS => preflight(),
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        };
    }

    match (&req.method, path.as_str()) {
        (&Method::GET, "/api/resolve") => resolve(&req, &state).await,
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

fn preflight() -> Response<RelayBody> {
    let mut response = Response::new(full_body(""));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Range"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<RelayBody> {
    let mut response = Response::new(full_body(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Base for generated proxy links: the configured public URL, else the
/// request's own host.
fn public_base(req: &Parts, state: &AppState) -> String {
    if let Some(base) = &state.public_url {
        return base.clone();
    }
    let host = req
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

async fn resolve(req: &Parts, state: &AppState) -> Response<RelayBody> {
    let Some(resolver) = &state.resolver else {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"success": false, "error": "no resolution provider configured"}),
        );
    };

    let mut query = None;
    let mut owner = None;
    for (key, value) in url::form_urlencoded::parse(req.uri.query().unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "query" => query = Some(value.into_owned()),
            "api_key" => owner = Some(value.into_owned()),
            _ => {}
        }
    }
    let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"success": false, "error": "missing query"}),
        );
    };
    let owner = owner.filter(|o| !o.is_empty()).unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let track = match resolver.resolve(&query).await {
        Ok(track) => track,
        Err(e) => {
            warn!(query = %query, error = %e, "resolution exhausted");
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"success": false, "error": e.to_string()}),
            );
        }
    };

    let Some(origin_url) = track.origin_url.as_deref().filter(|u| !u.is_empty()) else {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"success": false, "error": "track has no streamable origin"}),
        );
    };

    let handle = state.cache.register(origin_url, &owner).await;
    let stream_url = ProxyCache::proxy_url(&public_base(req, state), &handle);
    info!(title = %track.title, handle = %handle, "issued proxy link");

    json_response(
        StatusCode::OK,
        json!({"success": true, "title": track.title, "stream_url": stream_url}),
    )
}
