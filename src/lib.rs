//! # h1chain
//!
//! Embeddable async HTTP/1.1 serving: one session task per connection, an ordered
//! chain of pluggable handler units, and a byte-exact response writer with
//! keep-alive handling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use h1chain::http::{Response, StatusCode};
//! use h1chain::middleware::{Chain, RequestLogger, handler_fn};
//! use h1chain::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatch = Chain::new()
//!         .with(RequestLogger)
//!         .with(handler_fn(|ctx, _next| {
//!             Box::pin(async move {
//!                 ctx.set_response(Response::text(StatusCode::Ok, "Hello, World!"));
//!                 Ok(())
//!             })
//!         }))
//!         .compose();
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.serve(dispatch).await?;
//!     Ok(())
//! }
//! ```

use std::{future::Future, pin::Pin};

pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

/// A pinned, boxed, `Send` future, the return type of handler units and body writers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Chain, Dispatch, Handler, Next};
pub use server::{Server, ServerError, Session, SessionError, SessionHandle};
