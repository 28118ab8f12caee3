//! Async TCP acceptor and per-connection sessions.
//!
//! [`Server`] accepts TCP connections and spawns one [`Session`] task per
//! connection. Each session runs its exchanges through a shared [`Dispatch`]
//! and keeps the connection open for as long as keep-alive holds.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::http::{HttpRequestProvider, RequestProvider};
use crate::middleware::Dispatch;

mod config;
mod limited;
mod reaper;
mod session;
pub mod writer;

pub use config::ServerConfig;
pub use limited::{DEFAULT_EXCHANGE_LIMIT, Direction, ExchangeLimits, LimitExceeded, LimitedStream};
pub use reaper::IdleReaper;
pub use session::{Session, SessionError, SessionHandle};

/// Errors produced by the acceptor.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The TCP front door.
///
/// # Examples
///
/// ```rust,no_run
/// use h1chain::middleware::{Chain, RequestLogger};
/// use h1chain::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(Chain::new().with(RequestLogger).compose()).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    /// Binds the server to the given TCP address with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: ServerConfig::default(),
        })
    }

    /// Replaces the server settings.
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the configuration sessions will be served with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections forever, parsing requests with [`HttpRequestProvider`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, dispatch: Dispatch) -> Result<(), ServerError> {
        self.serve_with(Arc::new(HttpRequestProvider), dispatch).await
    }

    /// Accepts connections forever, parsing requests with `provider`.
    ///
    /// Every connection gets its own [`Session`] task sharing `provider` and
    /// `dispatch`. When [`ServerConfig::idle_timeout`] is set an [`IdleReaper`]
    /// task closes sessions idle past it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve_with<P>(self, provider: Arc<P>, dispatch: Dispatch) -> Result<(), ServerError>
    where
        P: RequestProvider,
    {
        info!(address = %self.local_addr, units = dispatch.len(), "h1chain listening");

        let reaper = self.config.idle_timeout.map(|timeout| Arc::new(IdleReaper::new(timeout)));
        let _reaper_task = reaper
            .as_ref()
            .map(|reaper| AbortOnDrop(Arc::clone(reaper).spawn(self.config.reap_interval)));

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %e, "could not set TCP_NODELAY");
            }

            let session = Session::new(
                stream,
                peer_addr,
                Arc::clone(&provider),
                dispatch.clone(),
                self.config.limits,
            );
            let registration = reaper
                .as_ref()
                .map(|reaper| (Arc::clone(reaper), reaper.register(session.handle())));

            tokio::spawn(async move {
                // Errors were already reported by the session itself.
                let _ = session.run().await;
                if let Some((reaper, id)) = registration {
                    reaper.deregister(id);
                }
            });
        }
    }
}

// Stops the reaper when the accept loop's future is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
