use crate::cache::{
    LocalFileCache, MemoryStore, ProxyCache, ProxyStore, RedisStore, DEFAULT_FALLBACK_CAPACITY, DOWNLOAD_DIR,
    HANDLE_TTL_SECS,
};
use crate::resolver::{
    DirectLinkStrategy, ExtractionClient, FastApiStrategy, FastPath, LegacyExtractionStrategy, OEmbedSearch,
    OriginResolver, PollPolicy, Strategy, StreamSearchClient, DEFAULT_OEMBED_URL,
};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Parser, Debug, Clone)]
#[command(name = "audio-relay")]
#[command(about = "Resolves music queries to audio and relays it behind short-lived proxy links", long_about = None)]
pub struct Cli {
    /// Address the relay listens on
    #[arg(long, env = "AUDIO_RELAY_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Maximum number of concurrently served connections
    #[arg(long, env = "AUDIO_RELAY_MAX_CONNECTIONS", default_value_t = 100)]
    pub max_connections: usize,

    /// Shared proxy store; without it handles live in this process only
    #[arg(long, env = "AUDIO_RELAY_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Entry bound of the in-process fallback store
    #[arg(long, env = "AUDIO_RELAY_FALLBACK_CAPACITY", default_value_t = DEFAULT_FALLBACK_CAPACITY)]
    pub fallback_capacity: usize,

    /// Lifetime of an issued proxy handle
    #[arg(long, env = "AUDIO_RELAY_HANDLE_TTL_SECS", default_value_t = HANDLE_TTL_SECS)]
    pub handle_ttl_secs: i64,

    /// Base URL for generated proxy links (defaults to the request Host)
    #[arg(long, env = "AUDIO_RELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Fast stream-search service
    #[arg(long, env = "AUDIO_RELAY_STREAM_API_URL")]
    pub stream_api_url: Option<String>,

    #[arg(long, env = "AUDIO_RELAY_STREAM_API_KEY", default_value = "")]
    pub stream_api_key: String,

    /// Legacy extraction service
    #[arg(long, env = "AUDIO_RELAY_LEGACY_API_URL")]
    pub legacy_api_url: Option<String>,

    #[arg(long, env = "AUDIO_RELAY_LEGACY_API_KEY", default_value = "")]
    pub legacy_api_key: String,

    /// Metadata lookup endpoint for video links
    #[arg(long, env = "AUDIO_RELAY_OEMBED_URL", default_value = DEFAULT_OEMBED_URL)]
    pub oembed_url: String,

    /// Where `fetch` stores downloaded tracks
    #[arg(long, env = "AUDIO_RELAY_DOWNLOAD_DIR", default_value = DOWNLOAD_DIR)]
    pub download_dir: PathBuf,

    #[arg(long, env = "AUDIO_RELAY_LEGACY_POLL_INTERVAL_MS", default_value_t = 2000)]
    pub legacy_poll_interval_ms: u64,

    /// Give up on a legacy extraction job after this long
    #[arg(long, env = "AUDIO_RELAY_LEGACY_POLL_TIMEOUT_SECS", default_value_t = 300)]
    pub legacy_poll_timeout_secs: u64,

    /// How often expired entries are swept from the fallback store
    #[arg(long, env = "AUDIO_RELAY_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay server (default)
    Serve,
    /// Resolve a query or link, download it and print the local path
    Fetch {
        query: String,
    },
}

impl Cli {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.legacy_poll_interval_ms))
            .with_deadline(Duration::from_secs(self.legacy_poll_timeout_secs))
    }

    /// Builds the proxy cache. An unreachable shared store is kept and
    /// retried; until it answers, the in-process store serves alone.
    pub async fn proxy_cache(&self) -> ProxyCache {
        let fallback = MemoryStore::new(self.fallback_capacity);
        let shared: Option<Arc<dyn ProxyStore>> = match &self.redis_url {
            Some(url) => match RedisStore::new(url) {
                Ok(store) => {
                    if let Err(e) = store.ensure_connected().await {
                        warn!(error = %e, "shared proxy store unreachable, will keep retrying");
                    }
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!(error = %e, "invalid shared proxy store url, using in-process store only");
                    None
                }
            },
            None => None,
        };
        ProxyCache::new(shared, fallback).with_ttl(chrono::Duration::seconds(self.handle_ttl_secs.max(1)))
    }

    /// Builds the strategy chain from whichever providers are configured.
    /// `files` switches the chain into download mode.
    pub fn resolver(&self, http: &reqwest::Client, files: Option<Arc<LocalFileCache>>) -> Option<OriginResolver> {
        let mut strategies: Vec<Arc<dyn Strategy>> = Vec::new();

        if let Some(base) = &self.stream_api_url {
            let client = StreamSearchClient::new(http.clone(), base.as_str(), self.stream_api_key.as_str());
            let fast = Arc::new(FastPath::new(client, files.clone()));
            let search = Arc::new(OEmbedSearch::new(http.clone(), self.oembed_url.as_str()));
            strategies.push(Arc::new(FastApiStrategy::new(fast.clone())));
            strategies.push(Arc::new(DirectLinkStrategy::new(search, fast)));
        }

        if let Some(base) = &self.legacy_api_url {
            let client = ExtractionClient::new(http.clone(), base.as_str(), self.legacy_api_key.as_str());
            strategies.push(Arc::new(LegacyExtractionStrategy::new(client, files, self.poll_policy())));
        }

        if strategies.is_empty() {
            return None;
        }
        Some(OriginResolver::new(strategies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["audio-relay"]).unwrap();
        assert_eq!(cli.listen, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(cli.handle_ttl_secs, 3600);
        assert_eq!(cli.download_dir, PathBuf::from("downloads"));
        assert!(cli.command.is_none());
        assert!(cli.resolver(&reqwest::Client::new(), None).is_none());
    }

    #[tokio::test]
    async fn unreachable_redis_stays_configured() {
        let cli = Cli::try_parse_from(["audio-relay", "--redis-url", "redis://127.0.0.1:1/"]).unwrap();
        assert!(cli.proxy_cache().await.has_shared_store());

        let bad = Cli::try_parse_from(["audio-relay", "--redis-url", "not a url"]).unwrap();
        assert!(!bad.proxy_cache().await.has_shared_store());
    }

    #[test]
    fn fetch_subcommand_takes_a_query() {
        let cli = Cli::try_parse_from(["audio-relay", "fetch", "Tum Hi Ho"]).unwrap();
        match cli.command {
            Some(Command::Fetch { query }) => assert_eq!(query, "Tum Hi Ho"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn strategy_chain_follows_configured_providers() {
        let cli = Cli::try_parse_from([
            "audio-relay",
            "--stream-api-url",
            "http://fast.local",
            "--legacy-api-url",
            "http://legacy.local",
        ])
        .unwrap();
        let resolver = cli.resolver(&reqwest::Client::new(), None).unwrap();
        assert_eq!(
            resolver.strategy_names(),
            vec!["fast-api", "direct-link", "legacy-extraction"]
        );

        let legacy_only = Cli::try_parse_from(["audio-relay", "--legacy-api-url", "http://legacy.local"]).unwrap();
        assert_eq!(
            legacy_only.resolver(&reqwest::Client::new(), None).unwrap().strategy_names(),
            vec!["legacy-extraction"]
        );
    }
}
