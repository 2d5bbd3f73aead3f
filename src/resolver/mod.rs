mod direct_link;
mod fast_api;
mod legacy;
mod link;

pub use direct_link::*;
pub use fast_api::*;
pub use legacy::*;
pub use link::*;

use crate::error::ResolveError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub title: String,
    pub origin_url: Option<String>,
    pub local_path: Option<PathBuf>,
}

impl ResolvedTrack {
    pub fn new(title: impl Into<String>, origin_url: Option<String>, local_path: Option<PathBuf>) -> Self {
        Self {
            title: title.into(),
            origin_url,
            local_path,
        }
    }

    pub fn is_playable(&self) -> bool {
        self.origin_url.as_deref().is_some_and(|u| !u.is_empty())
            || self.local_path.as_deref().is_some_and(|p| p.is_file())
    }
}

/// Input handed to every strategy.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub input: String,
    pub link: Option<VideoLink>,
}

impl ResolveRequest {
    pub fn new(input: &str) -> Self {
        let input = input.trim().to_string();
        let link = VideoLink::parse(&input);
        Self { input, link }
    }
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Resolved(ResolvedTrack),
    /// Not applicable to this input.
    Skipped,
    Failed(String),
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, request: &ResolveRequest) -> StrategyOutcome;
}

pub struct OriginResolver {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl OriginResolver {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, query_or_link: &str) -> Result<ResolvedTrack, ResolveError> {
        let request = ResolveRequest::new(query_or_link);
        let mut last_reason = None;

        for strategy in &self.strategies {
            match strategy.attempt(&request).await {
                StrategyOutcome::Resolved(track) if track.is_playable() => {
                    info!(strategy = strategy.name(), title = %track.title, "resolved track");
                    return Ok(track);
                }
                StrategyOutcome::Resolved(_) => {
                    warn!(strategy = strategy.name(), "strategy returned nothing playable");
                    last_reason = Some(format!("{}: nothing playable", strategy.name()));
                }
                StrategyOutcome::Skipped => {
                    debug!(strategy = strategy.name(), "strategy not applicable");
                }
                StrategyOutcome::Failed(reason) => {
                    warn!(strategy = strategy.name(), reason = %reason, "strategy failed");
                    last_reason = Some(format!("{}: {reason}", strategy.name()));
                }
            }
        }

        Err(ResolveError::Exhausted {
            reason: last_reason.unwrap_or_else(|| "no applicable strategy".to_string()),
        })
    }
}
