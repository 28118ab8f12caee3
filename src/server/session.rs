//! One connection, end to end: read, dispatch, write, repeat.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream},
    sync::watch,
    time::Instant,
};
use tracing::{debug, trace, warn};

use super::{
    limited::{ExchangeLimits, LimitExceeded, LimitedStream},
    writer,
};
use crate::{
    context::Context,
    http::{RequestError, RequestProvider},
    middleware::{Dispatch, HandlerError},
};

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("malformed request: {0}")]
    Protocol(#[source] RequestError),

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error(transparent)]
    LimitExceeded(LimitExceeded),
}

impl SessionError {
    /// Returns `true` if the session ended because an exchange outgrew its ceiling.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, SessionError::LimitExceeded(_))
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        match LimitExceeded::from_io(&err) {
            Some(limit) => SessionError::LimitExceeded(limit),
            None => SessionError::Transport(err),
        }
    }
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Io(io) => io.into(),
            other => SessionError::Protocol(other),
        }
    }
}

struct Shared {
    remote_addr: SocketAddr,
    epoch: Instant,
    // Nanoseconds after `epoch`.
    last_activity: AtomicU64,
    alive: AtomicBool,
    // Set from a parsed request until its response is written.
    in_exchange: AtomicBool,
    close_tx: watch::Sender<bool>,
}

/// Control surface of a running session, for pools and idle reapers.
///
/// Cheap to clone; every clone refers to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    fn new(remote_addr: SocketAddr) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Self {
            shared: Arc::new(Shared {
                remote_addr,
                epoch: Instant::now(),
                last_activity: AtomicU64::new(0),
                alive: AtomicBool::new(true),
                in_exchange: AtomicBool::new(false),
                close_tx,
            }),
        };
        (handle, close_rx)
    }

    /// Asks the session to drop its connection.
    ///
    /// Takes effect at the session's next suspension point, including in the
    /// middle of an exchange. Calling it again, or after the session ended, does
    /// nothing.
    pub fn force_close(&self) {
        if !self.shared.close_tx.send_replace(true) {
            debug!(peer = %self.shared.remote_addr, "force close requested");
        }
    }

    /// When the session last started or finished an exchange.
    pub fn last_activity(&self) -> Instant {
        self.shared.epoch + Duration::from_nanos(self.shared.last_activity.load(Ordering::Acquire))
    }

    /// Time since [`last_activity`](Self::last_activity).
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }

    /// `false` once the session loop has exited.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// `true` while a request is being handled or its response written.
    ///
    /// A session in this state is busy however old its
    /// [`last_activity`](Self::last_activity) is; idle policies should leave it be.
    pub fn in_exchange(&self) -> bool {
        self.shared.in_exchange.load(Ordering::Acquire)
    }

    /// Address of the peer this session serves.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    fn set_in_exchange(&self, busy: bool) {
        self.shared.in_exchange.store(busy, Ordering::Release);
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.shared.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.shared.last_activity.store(nanos, Ordering::Release);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("remote_addr", &self.shared.remote_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// An HTTP/1.1 session owning one connection.
///
/// The session does nothing until [`run`](Self::run) is awaited; the acceptor is
/// expected to spawn that future as its own task. Exchanges on one session are
/// strictly sequential: the next request is not read until the previous
/// response is fully flushed.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use h1chain::{
///     http::HttpRequestProvider,
///     middleware::Chain,
///     server::{ExchangeLimits, Session},
/// };
///
/// # async fn accept(listener: tokio::net::TcpListener) -> std::io::Result<()> {
/// let dispatch = Chain::new().compose();
/// let provider = Arc::new(HttpRequestProvider);
/// let (stream, peer) = listener.accept().await?;
/// let session = Session::new(stream, peer, provider, dispatch, ExchangeLimits::default());
/// let handle = session.handle();
/// tokio::spawn(session.run());
/// handle.force_close();
/// # Ok(())
/// # }
/// ```
pub struct Session<S, P> {
    stream: BufStream<S>,
    provider: Arc<P>,
    dispatch: Dispatch,
    limits: ExchangeLimits,
    handle: SessionHandle,
    close_rx: watch::Receiver<bool>,
}

impl<S, P> Session<S, P>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    P: RequestProvider,
{
    /// Wraps an accepted connection. Nothing is read until [`run`](Self::run).
    ///
    /// # Arguments
    ///
    /// * `stream` - The connection, buffered internally in both directions.
    /// * `remote_addr` - The peer address, exposed to handlers through the context.
    /// * `provider` - Parses request heads off the stream.
    /// * `dispatch` - The handler chain run once per exchange.
    /// * `limits` - Read and write ceilings applied to every exchange.
    pub fn new(
        stream: S,
        remote_addr: SocketAddr,
        provider: Arc<P>,
        dispatch: Dispatch,
        limits: ExchangeLimits,
    ) -> Self {
        let (handle, close_rx) = SessionHandle::new(remote_addr);
        handle.touch();
        Self {
            stream: BufStream::new(stream),
            provider,
            dispatch,
            limits,
            handle,
            close_rx,
        }
    }

    /// Returns a handle for closing or monitoring this session from elsewhere.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Serves exchanges until the peer disconnects, keep-alive ends, the session
    /// is force-closed, or an error occurs. The connection is shut down in every
    /// case.
    ///
    /// # Errors
    ///
    /// The first error of any exchange. There is no per-exchange recovery: any
    /// failure ends the connection, and nothing is sent back for it.
    pub async fn run(self) -> Result<(), SessionError> {
        let Self {
            mut stream,
            provider,
            dispatch,
            limits,
            handle,
            mut close_rx,
        } = self;
        let peer = handle.remote_addr();
        debug!(peer = %peer, "session started");

        let result = tokio::select! {
            result = serve(&mut stream, &*provider, &dispatch, limits, &handle) => result,
            _ = closed(&mut close_rx) => {
                debug!(peer = %peer, "session force-closed");
                Ok(())
            }
        };
        handle.shared.alive.store(false, Ordering::Release);
        handle.set_in_exchange(false);

        match &result {
            Err(SessionError::LimitExceeded(limit)) => {
                warn!(peer = %peer, error = %limit, "exchange over its byte ceiling, dropping connection");
            }
            Err(e) => warn!(peer = %peer, error = %e, "error while serving, dropping connection"),
            Ok(()) => {}
        }

        // Unflushed bytes at this point belong to a failed exchange; they are
        // dropped rather than sent.
        if let Err(e) = stream.get_mut().shutdown().await {
            trace!(peer = %peer, error = %e, "shutdown failed");
        }
        debug!(peer = %peer, "session ended");
        result
    }
}

async fn serve<S, P>(
    stream: &mut BufStream<S>,
    provider: &P,
    dispatch: &Dispatch,
    limits: ExchangeLimits,
    handle: &SessionHandle,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    P: RequestProvider,
{
    let peer = handle.remote_addr();
    loop {
        let mut bounded = LimitedStream::new(&mut *stream, limits);

        let Some(request) = provider.provide(&mut bounded).await? else {
            debug!(peer = %peer, "connection closed by peer");
            return Ok(());
        };
        handle.touch();
        handle.set_in_exchange(true);
        debug!(
            peer = %peer,
            method = %request.method(),
            target = request.target(),
            "dispatching request"
        );

        let mut ctx = Context::new(request, peer);
        dispatch
            .dispatch(&mut ctx)
            .await
            .map_err(SessionError::Handler)?;

        let keep_alive = writer::keep_alive(ctx.request(), ctx.response());
        if let Some(response) = ctx.take_response() {
            writer::write_bounded(&mut bounded, response, ctx.cookies()).await?;
        }
        handle.touch();
        handle.set_in_exchange(false);

        if !keep_alive {
            debug!(peer = %peer, "keep-alive not requested, closing");
            return Ok(());
        }
    }
}

// Resolves once `force_close` has been called.
async fn closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
        sync::Notify,
    };

    use super::*;
    use crate::{
        http::{HttpRequestProvider, Response, StatusCode},
        middleware::{Chain, handler_fn},
    };

    fn peer() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    fn open_session(
        dispatch: Dispatch,
        limits: ExchangeLimits,
    ) -> (Session<DuplexStream, HttpRequestProvider>, DuplexStream) {
        let (server, client) = duplex(64 * 1024);
        let session = Session::new(server, peer(), Arc::new(HttpRequestProvider), dispatch, limits);
        (session, client)
    }

    fn ok_chain() -> Dispatch {
        Chain::new()
            .with(handler_fn(|ctx, _next| {
                Box::pin(async move {
                    ctx.set_response(Response::text(StatusCode::Ok, "ok"));
                    Ok(())
                })
            }))
            .compose()
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 2\r\n\r\nok";

    #[tokio::test]
    async fn peer_hangup_before_request_ends_cleanly() {
        let (session, client) = open_session(ok_chain(), ExchangeLimits::default());
        let handle = session.handle();
        drop(client);
        session.run().await.unwrap();
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn serves_keep_alive_then_close() {
        let (session, mut client) = open_session(ok_chain(), ExchangeLimits::default());
        let task = tokio::spawn(session.run());

        client
            .write_all(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, format!("{OK}{OK}"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_error_drops_connection_silently() {
        let dispatch = Chain::new()
            .with(handler_fn(|_ctx, _next| {
                Box::pin(async { Err::<(), HandlerError>("nope".into()) })
            }))
            .compose();
        let (session, mut client) = open_session(dispatch, ExchangeLimits::default());
        let task = tokio::spawn(session.run());

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        assert!(out.is_empty());
        assert!(matches!(task.await.unwrap(), Err(SessionError::Handler(_))));
    }

    #[tokio::test]
    async fn malformed_request_is_a_protocol_error() {
        let (session, mut client) = open_session(ok_chain(), ExchangeLimits::default());
        let task = tokio::spawn(session.run());

        client.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        assert!(out.is_empty());
        assert!(matches!(task.await.unwrap(), Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn oversized_response_ends_session_with_nothing_written() {
        let dispatch = Chain::new()
            .with(handler_fn(|ctx, _next| {
                Box::pin(async move {
                    ctx.set_response(Response::text(StatusCode::Ok, "x".repeat(1000)));
                    Ok(())
                })
            }))
            .compose();
        let (session, mut client) = open_session(dispatch, ExchangeLimits::new(1024, 256));
        let task = tokio::spawn(session.run());

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_limit_exceeded());
        assert!(out.is_empty(), "{}", String::from_utf8_lossy(&out));
    }

    #[tokio::test]
    async fn force_close_interrupts_a_suspended_handler() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (entered_tx, release_rx) = (Arc::clone(&entered), Arc::clone(&release));
        let dispatch = Chain::new()
            .with(handler_fn(move |ctx, _next| {
                let entered = Arc::clone(&entered_tx);
                let release = Arc::clone(&release_rx);
                Box::pin(async move {
                    entered.notify_one();
                    release.notified().await;
                    ctx.set_response(Response::text(StatusCode::Ok, "too late"));
                    Ok(())
                })
            }))
            .compose();
        let (session, mut client) = open_session(dispatch, ExchangeLimits::default());
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        entered.notified().await;
        assert!(handle.in_exchange());

        handle.force_close();
        handle.force_close();
        task.await.unwrap().unwrap();
        assert!(!handle.is_alive());
        assert!(!handle.in_exchange());

        // Releasing the handler now reaches nothing.
        release.notify_one();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn force_close_interrupts_idle_read() {
        let (session, mut client) = open_session(ok_chain(), ExchangeLimits::default());
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_alive());
        handle.force_close();
        handle.force_close();

        task.await.unwrap().unwrap();
        assert!(!handle.is_alive());

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn last_activity_advances_with_exchanges() {
        let (session, mut client) = open_session(ok_chain(), ExchangeLimits::default());
        let handle = session.handle();
        let started = handle.last_activity();
        let task = tokio::spawn(session.run());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(handle.idle_for() >= Duration::from_secs(5));

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; OK.len()];
        client.read_exact(&mut buf).await.unwrap();

        assert!(handle.last_activity() >= started + Duration::from_secs(5));
        assert!(handle.idle_for() < Duration::from_secs(1));

        drop(client);
        task.await.unwrap().unwrap();
    }
}
