use super::{FastPath, ResolveRequest, Strategy, StrategyOutcome, VideoLink};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_OEMBED_URL: &str = "https://www.youtube.com/oembed";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Turns a video link into a human readable title.
#[async_trait]
pub trait MetadataSearch: Send + Sync {
    async fn title_for(&self, link: &VideoLink) -> Result<String, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
}

/// Title lookup through an oEmbed endpoint.
pub struct OEmbedSearch {
    http: reqwest::Client,
    endpoint: String,
}

impl OEmbedSearch {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl MetadataSearch for OEmbedSearch {
    async fn title_for(&self, link: &VideoLink) -> Result<String, ProviderError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("url", link.canonical().as_str()), ("format", "json")])
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http { status });
        }

        let body: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        body.title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed("oEmbed response has no title".into()))
    }
}

/// For links only: look the title up, then retry the fast path with it.
pub struct DirectLinkStrategy {
    search: Arc<dyn MetadataSearch>,
    fast: Arc<FastPath>,
}

impl DirectLinkStrategy {
    pub fn new(search: Arc<dyn MetadataSearch>, fast: Arc<FastPath>) -> Self {
        Self { search, fast }
    }
}

#[async_trait]
impl Strategy for DirectLinkStrategy {
    fn name(&self) -> &'static str {
        "direct-link"
    }

    async fn attempt(&self, request: &ResolveRequest) -> StrategyOutcome {
        let Some(link) = &request.link else {
            return StrategyOutcome::Skipped;
        };

        let title = match self.search.title_for(link).await {
            Ok(title) => title,
            Err(e) => return StrategyOutcome::Failed(format!("title lookup: {e}")),
        };

        match self.fast.run(&title).await {
            Ok(track) => StrategyOutcome::Resolved(track),
            Err(reason) => StrategyOutcome::Failed(reason),
        }
    }
}
