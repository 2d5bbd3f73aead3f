use crate::proxy::handler::{handle_request, SharedState};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub struct ProxyServer {
    listener: TcpListener,
    state: SharedState,
    semaphore: Arc<Semaphore>,
    sweep_interval: Option<Duration>,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, state: SharedState, max_connections: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state,
            semaphore: Arc::new(Semaphore::new(max_connections.max(1))),
            sweep_interval: None,
        })
    }

    /// Periodically purge expired entries from the process-local store.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(
            %addr,
            max_connections = self.semaphore.available_permits(),
            shared_store = self.state.cache.has_shared_store(),
            "audio relay listening"
        );

        let sweeper = self.sweep_interval.map(|every| {
            let cache = self.state.cache.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    cache.purge_fallback().await;
                }
            })
        });

        tokio::pin!(shutdown);
        let result = loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => break Err(io::Error::other(e)),
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let state = self.state.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });

                if let Err(e) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, error = %e, "connection closed with error");
                }
            });
        };

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        info!("audio relay stopped accepting connections");
        result
    }
}
