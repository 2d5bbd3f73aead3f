use anyhow::{Context, Result};
use audio_relay::cache::LocalFileCache;
use audio_relay::config::{Cli, Command};
use audio_relay::proxy::{AppState, ProxyServer, StreamRelay};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let http = reqwest::Client::builder()
        .build()
        .context("building http client")?;

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(cli, http).await,
        Command::Fetch { query } => fetch(cli, http, &query).await,
    }
}

async fn serve(cli: Cli, http: reqwest::Client) -> Result<()> {
    let cache = Arc::new(cli.proxy_cache().await);
    let resolver = cli.resolver(&http, None).map(Arc::new);
    match &resolver {
        Some(r) => info!(strategies = ?r.strategy_names(), "resolver ready"),
        None => info!("no resolution provider configured, /api/resolve disabled"),
    }

    let state = Arc::new(AppState {
        relay: StreamRelay::new(cache.clone(), http),
        cache,
        resolver,
        public_url: cli.public_url.clone(),
    });

    ProxyServer::bind(cli.listen, state, cli.max_connections)
        .await
        .with_context(|| format!("binding {}", cli.listen))?
        .with_sweep_interval(cli.sweep_interval())
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, serving until killed");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn fetch(cli: Cli, http: reqwest::Client, query: &str) -> Result<()> {
    let files = LocalFileCache::new(cli.download_dir.clone())
        .await
        .with_context(|| format!("creating {}", cli.download_dir.display()))?;
    let resolver = cli
        .resolver(&http, Some(Arc::new(files)))
        .context("no resolution provider configured")?;

    match resolver.resolve(query).await {
        Ok(track) => {
            match (&track.local_path, &track.origin_url) {
                (Some(path), _) => println!("{}", path.display()),
                (None, Some(url)) => println!("{url}"),
                (None, None) => {}
            }
            info!(title = %track.title, "fetched");
            Ok(())
        }
        Err(e) => {
            error!(query, error = %e, "could not resolve");
            Err(e).with_context(|| format!("resolving {query:?}"))
        }
    }
}
