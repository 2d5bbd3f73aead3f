use super::{ResolveRequest, ResolvedTrack, Strategy, StrategyOutcome};
use crate::cache::{CacheKey, HttpFetcher, LocalFileCache};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    stream_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHit {
    pub stream_url: String,
    pub title: String,
}

/// Client for the external stream-search service
/// (`GET {base}/api/stream?query=&api_key=`).
#[derive(Clone)]
pub struct StreamSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl StreamSearchClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: SEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn search(&self, query: &str) -> Result<StreamHit, ProviderError> {
        let response = self
            .http
            .get(format!("{}/api/stream", self.base_url))
            .query(&[("query", query), ("api_key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http { status });
        }

        let body: StreamResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        match body.stream_url.filter(|u| !u.is_empty()) {
            Some(stream_url) if body.success => Ok(StreamHit {
                stream_url,
                title: body.title.filter(|t| !t.is_empty()).unwrap_or_else(|| query.to_string()),
            }),
            _ => Err(ProviderError::Api(format!("no stream found for {query:?}"))),
        }
    }
}

/// Search, then optionally materialise the hit on local storage. Shared by
/// the fast strategy and the direct-link retry.
pub struct FastPath {
    client: StreamSearchClient,
    files: Option<Arc<LocalFileCache>>,
}

impl FastPath {
    pub fn new(client: StreamSearchClient, files: Option<Arc<LocalFileCache>>) -> Self {
        Self { client, files }
    }

    pub async fn run(&self, query: &str) -> Result<ResolvedTrack, String> {
        let hit = self.client.search(query).await.map_err(|e| e.to_string())?;
        debug!(title = %hit.title, "stream search hit");

        let local_path = match &self.files {
            Some(files) => {
                let fetcher = HttpFetcher::new(self.client.http.clone(), hit.stream_url.clone());
                let path = files
                    .get_or_fetch(&CacheKey::title(&hit.title), &fetcher)
                    .await
                    .map_err(|e| e.to_string())?;
                Some(path)
            }
            None => None,
        };

        Ok(ResolvedTrack::new(hit.title, Some(hit.stream_url), local_path))
    }
}

pub struct FastApiStrategy {
    fast: Arc<FastPath>,
}

impl FastApiStrategy {
    pub fn new(fast: Arc<FastPath>) -> Self {
        Self { fast }
    }
}

#[async_trait]
impl Strategy for FastApiStrategy {
    fn name(&self) -> &'static str {
        "fast-api"
    }

    async fn attempt(&self, request: &ResolveRequest) -> StrategyOutcome {
        match self.fast.run(&request.input).await {
            Ok(track) => StrategyOutcome::Resolved(track),
            Err(reason) => StrategyOutcome::Failed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StreamSearchClient {
        StreamSearchClient::new(reqwest::Client::new(), server.uri(), "key123")
    }

    #[tokio::test]
    async fn successful_search_returns_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream"))
            .and(query_param("query", "Tum Hi Ho"))
            .and(query_param("api_key", "key123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "stream_url": "https://cdn.example/tum.mp3",
                "title": "Tum Hi Ho"
            })))
            .mount(&server)
            .await;

        let hit = client(&server).search("Tum Hi Ho").await.unwrap();

        assert_eq!(hit.stream_url, "https://cdn.example/tum.mp3");
        assert_eq!(hit.title, "Tum Hi Ho");
    }

    #[tokio::test]
    async fn missing_title_falls_back_to_query() {
        let server = MockServer::start().await;
        Mock::given(path("/api/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "stream_url": "https://cdn.example/x.mp3"
            })))
            .mount(&server)
            .await;

        let hit = client(&server).search("some query").await.unwrap();
        assert_eq!(hit.title, "some query");
    }

    #[tokio::test]
    async fn success_flag_and_url_are_both_required() {
        let server = MockServer::start().await;
        Mock::given(path("/api/stream"))
            .and(query_param("query", "no flag"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "stream_url": "https://cdn.example/x.mp3"
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/stream"))
            .and(query_param("query", "no url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "stream_url": ""
            })))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(matches!(c.search("no flag").await, Err(ProviderError::Api(_))));
        assert!(matches!(c.search("no url").await, Err(ProviderError::Api(_))));
    }

    #[tokio::test]
    async fn non_2xx_and_garbage_are_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/api/stream"))
            .and(query_param("query", "boom"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(path("/api/stream"))
            .and(query_param("query", "garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(matches!(c.search("boom").await, Err(ProviderError::Http { .. })));
        assert!(matches!(c.search("garbage").await, Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(path("/api/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "stream_url": "u"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let c = client(&server).with_timeout(Duration::from_millis(50));
        assert!(matches!(c.search("slow").await, Err(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn strategy_downloads_when_file_cache_attached() {
        let server = MockServer::start().await;
        Mock::given(path("/api/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "stream_url": format!("{}/files/song.mp3", server.uri()),
                "title": "Shape of You"
            })))
            .mount(&server)
            .await;
        Mock::given(path("/files/song.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3 audio".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(LocalFileCache::new(dir.path()).await.unwrap());
        let strategy = FastApiStrategy::new(Arc::new(FastPath::new(client(&server), Some(files))));

        let StrategyOutcome::Resolved(track) = strategy.attempt(&ResolveRequest::new("shape")).await else {
            panic!("expected a resolved track");
        };
        assert_eq!(track.local_path, Some(dir.path().join("Shape_of_You.mp3")));

        // cached now: no second download
        let again = strategy.attempt(&ResolveRequest::new("shape")).await;
        assert!(matches!(again, StrategyOutcome::Resolved(_)));
    }
}
