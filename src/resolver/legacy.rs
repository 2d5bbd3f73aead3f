use super::{ResolveRequest, ResolvedTrack, Strategy, StrategyOutcome};
use crate::cache::{CacheKey, HttpFetcher, LocalFileCache};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the extraction job. With neither bound set the loop
/// only ends when the job does, so callers are expected to set one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(POLL_INTERVAL)
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(default)]
    status: String,
    link: Option<String>,
    format: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    pub link: String,
    pub format: String,
}

/// Client for the job-queue extraction service (`GET {base}/song/{id}?api={key}`).
#[derive(Clone)]
pub struct ExtractionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ExtractionClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn status(&self, video_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .http
            .get(format!("{}/song/{}", self.base_url, video_id))
            .query(&[("api", self.api_key.as_str())])
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http { status });
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Polls the job until it is done, failed, or `policy` runs out.
    pub async fn wait_for_link(&self, video_id: &str, policy: &PollPolicy) -> Result<FinishedJob, ProviderError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let job = self.status(video_id).await?;

            match job.status.to_lowercase().as_str() {
                "downloading" => {
                    if policy.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(ProviderError::Timeout);
                    }
                    if policy
                        .deadline
                        .is_some_and(|deadline| started.elapsed() + policy.interval > deadline)
                    {
                        return Err(ProviderError::Timeout);
                    }
                    debug!(video_id, attempts, "extraction still running");
                    tokio::time::sleep(policy.interval).await;
                }
                "error" => {
                    let msg = job
                        .error
                        .or(job.message)
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(ProviderError::Api(msg));
                }
                "done" => {
                    let link = job.link.filter(|l| !l.is_empty()).ok_or_else(|| {
                        ProviderError::Malformed("finished job has no download link".into())
                    })?;
                    let format = job
                        .format
                        .filter(|f| !f.is_empty())
                        .unwrap_or_else(|| "mp3".to_string())
                        .to_lowercase();
                    return Ok(FinishedJob { link, format });
                }
                other => {
                    return Err(ProviderError::Malformed(format!("unexpected status '{other}'")));
                }
            }
        }
    }
}

/// Last resort for links: vendor side extraction, then a direct download.
pub struct LegacyExtractionStrategy {
    client: ExtractionClient,
    files: Option<Arc<LocalFileCache>>,
    policy: PollPolicy,
}

impl LegacyExtractionStrategy {
    pub fn new(client: ExtractionClient, files: Option<Arc<LocalFileCache>>, policy: PollPolicy) -> Self {
        Self { client, files, policy }
    }
}

#[async_trait]
impl Strategy for LegacyExtractionStrategy {
    fn name(&self) -> &'static str {
        "legacy-extraction"
    }

    async fn attempt(&self, request: &ResolveRequest) -> StrategyOutcome {
        let Some(link) = &request.link else {
            return StrategyOutcome::Skipped;
        };
        let id = link.id.as_str();

        if let Some(files) = &self.files {
            if let Some(path) = files.lookup(&CacheKey::video(id, None)).await {
                return StrategyOutcome::Resolved(ResolvedTrack::new(id, None, Some(path)));
            }
        }

        let job = match self.client.wait_for_link(id, &self.policy).await {
            Ok(job) => job,
            Err(e) => return StrategyOutcome::Failed(e.to_string()),
        };

        let local_path = match &self.files {
            Some(files) => {
                let fetcher = HttpFetcher::new(self.client.http.clone(), job.link.clone());
                match files
                    .get_or_fetch(&CacheKey::video(id, Some(job.format.clone())), &fetcher)
                    .await
                {
                    Ok(path) => Some(path),
                    Err(e) => return StrategyOutcome::Failed(e.to_string()),
                }
            }
            None => None,
        };

        StrategyOutcome::Resolved(ResolvedTrack::new(id, Some(job.link), local_path))
    }
}
