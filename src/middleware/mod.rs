//! Handler chain — ordered, pluggable units composed into one dispatch entry point.
//!
//! ## Core types
//!
//! - [`Handler`] — trait implemented by every unit in a chain.
//! - [`Next`] — cursor into the remaining units; call [`Next::run`] to continue.
//! - [`Chain`] — ordered list of units under construction.
//! - [`Dispatch`] — the composed entry point, built once and shared by every session.
//! - [`handler_fn`] — turns a closure into a [`Handler`].
//! - [`RequestLogger`] and [`ErrorPage`] — built-in units.
//!
//! Units run in registration order. A unit continues the chain by awaiting
//! `next.run(ctx)`; one that returns without doing so short-circuits it, and no
//! later unit sees the context. Running past the last unit is a no-op that leaves
//! the response slot as it is.

use std::{error::Error, fmt, sync::Arc};

use tokio::time::Instant;
use tracing::{error, info};

use crate::{
    BoxFuture,
    context::Context,
    http::{Response, StatusCode},
};

/// Error raised by a handler unit. It travels up the chain untouched and ends the
/// connection unless a unit such as [`ErrorPage`] turns it into a response.
pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;

/// Completion of a handler unit.
pub type HandlerResult = Result<(), HandlerError>;

/// The core trait for all handler units.
///
/// Implementors receive the per-exchange [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — `next.run(ctx).await` without touching anything.
/// - **Short-circuit** — set a response (or not) and return without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, then adjust `ctx.response_mut()`.
///
/// # Contract
///
/// - Units are shared by every connection at once, hence `Send + Sync`. A unit
///   holding mutable state across exchanges protects it itself.
/// - The returned future must be `Send` so sessions can run on any worker thread.
///
/// # Examples
///
/// ```rust,no_run
/// use h1chain::{
///     BoxFuture,
///     context::Context,
///     http::{Response, StatusCode},
///     middleware::{Handler, HandlerResult, Next},
/// };
///
/// struct Hello;
///
/// impl Handler for Hello {
///     fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             ctx.set_response(Response::text(StatusCode::Ok, "hello"));
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync {
    /// Handles one exchange.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The exchange context: the request, the response slot, and cookies.
    /// * `next` - Cursor over the units after this one. Call [`Next::run`] to
    ///   continue the chain, or drop it to short-circuit.
    ///
    /// # Returns
    ///
    /// `Ok(())` when the unit is done with the exchange. An error aborts the
    /// rest of the chain and propagates to the units that ran before it.
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// A cursor into the units after the one currently running.
///
/// `Next` is consumed by [`run`](Self::run), so a unit continues the chain at
/// most once.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    /// Runs the next unit, handing it a cursor over the rest of the chain.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The same context the calling unit received.
    ///
    /// # Returns
    ///
    /// A future resolving to the downstream result. Past the last unit this
    /// completes immediately with `Ok(())`.
    pub fn run<'c>(self, ctx: &'c mut Context) -> BoxFuture<'c, HandlerResult>
    where
        'a: 'c,
    {
        match self.remaining.split_first() {
            Some((unit, rest)) => unit.handle(ctx, Next { remaining: rest }),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// Number of units still ahead of this cursor.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining.len())
            .finish()
    }
}

/// An ordered list of handler units, composed into a [`Dispatch`] with
/// [`compose`](Self::compose).
///
/// # Examples
///
/// ```rust,no_run
/// use h1chain::middleware::{Chain, ErrorPage, RequestLogger};
///
/// let dispatch = Chain::new()
///     .with(RequestLogger)
///     .with(ErrorPage::default())
///     .compose();
/// ```
#[derive(Default, Clone)]
pub struct Chain {
    units: Vec<Arc<dyn Handler>>,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit to the end of the chain.
    #[must_use]
    pub fn with(mut self, unit: impl Handler + 'static) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    /// Appends an already shared unit, e.g. one registered in several chains.
    pub fn push(&mut self, unit: Arc<dyn Handler>) -> &mut Self {
        self.units.push(unit);
        self
    }

    /// Number of units registered so far.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Freezes the chain into a dispatch entry point.
    pub fn compose(self) -> Dispatch {
        Dispatch {
            units: self.units.into(),
        }
    }
}

impl FromIterator<Arc<dyn Handler>> for Chain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Handler>>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().collect(),
        }
    }
}

/// The composed handler chain.
///
/// Holds no per-exchange state. Cloning is cheap, and one `Dispatch` serves any
/// number of concurrent contexts from any number of sessions.
#[derive(Clone)]
pub struct Dispatch {
    units: Arc<[Arc<dyn Handler>]>,
}

impl Dispatch {
    /// Runs the chain against `ctx`.
    ///
    /// # Returns
    ///
    /// The first unit's result. With no units registered this is `Ok(())` and
    /// the context is left without a response.
    pub fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Next {
            remaining: &self.units,
        }
        .run(ctx)
    }

    /// Number of units in the chain.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("units", &self.units.len())
            .finish()
    }
}

/// A [`Handler`] backed by a closure. Build one with [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        (self.f)(ctx, next)
    }
}

/// Wraps a closure as a handler unit.
///
/// # Examples
///
/// ```rust,no_run
/// use h1chain::middleware::{Chain, handler_fn};
///
/// let chain = Chain::new().with(handler_fn(|ctx, next| {
///     Box::pin(async move {
///         next.run(ctx).await?;
///         if let Some(response) = ctx.response_mut() {
///             response.add_header("X-Served-By", "h1chain");
///         }
///         Ok(())
///     })
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    HandlerFn { f }
}

/// Built-in unit that logs each request's method, target, status, and duration.
///
/// Emits one `tracing::info!` record after the rest of the chain completes.
/// Exchanges that end without a response are logged with status `-`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl Handler for RequestLogger {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx).await;

            let status = ctx
                .response()
                .map(|r| r.status().as_u16().to_string())
                .unwrap_or_else(|| "-".to_owned());
            info!(
                peer = %ctx.remote_addr(),
                "{} {} - {} ({:?})",
                ctx.request().method(),
                ctx.request().target(),
                status,
                start.elapsed()
            );

            result
        })
    }
}

/// Built-in unit that turns an error from the rest of the chain into a response.
///
/// Whatever partial response the failing units left behind is replaced by a
/// plain-text error page, and the connection is closed after it is written.
#[derive(Debug, Clone)]
pub struct ErrorPage {
    status: StatusCode,
    message: String,
}

impl ErrorPage {
    /// Creates an error page answering with `status` and a plain-text `message`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl Default for ErrorPage {
    fn default() -> Self {
        Self::new(StatusCode::InternalServerError, "Internal Server Error")
    }
}

impl Handler for ErrorPage {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Err(e) = next.run(ctx).await {
                error!(
                    peer = %ctx.remote_addr(),
                    target = ctx.request().target(),
                    error = %e,
                    "handler failed, sending error page"
                );
                ctx.set_response(
                    Response::text(self.status, self.message.clone()).close_connection(true),
                );
            }
            Ok(())
        })
    }
}
