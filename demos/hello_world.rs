//! Minimal h1chain server.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello_world
//! curl -v http://127.0.0.1:8080/
//! curl -v -d '{"name":"ferris"}' http://127.0.0.1:8080/greet
//! curl -v http://127.0.0.1:8080/count
//! ```

use std::{io, time::Duration};

use h1chain::{
    BoxFuture, Context,
    http::{BodyWriter, Response, StatusCode},
    middleware::{Chain, ErrorPage, HandlerResult, RequestLogger, handler_fn},
    server::{ExchangeLimits, Server, ServerConfig},
};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

/// Streams the numbers one to five, one line at a time.
struct Countdown;

impl BodyWriter for Countdown {
    fn write_body<'a>(
        self: Box<Self>,
        out: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            for n in 1..=5 {
                out.write_all(format!("{n}\n").as_bytes()).await?;
                out.flush().await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(())
        })
    }
}

async fn route(ctx: &mut Context) -> HandlerResult {
    let response = match ctx.request().path() {
        "/" => Response::text(StatusCode::Ok, "Hello, World!"),
        "/greet" => {
            let greeting: Greeting = ctx.json()?;
            Response::text(StatusCode::Ok, format!("Hello, {}!", greeting.name))
        }
        // No Content-Length: the body ends when the connection does.
        "/count" => Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .stream(Countdown)
            .close_connection(true),
        _ => Response::text(StatusCode::NotFound, "Not Found"),
    };
    ctx.set_response(response);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let chain = Chain::new()
        .with(RequestLogger)
        .with(ErrorPage::default())
        .with(handler_fn(|ctx, _next| Box::pin(route(ctx))));

    let config = ServerConfig::default()
        .limits(ExchangeLimits::new(64 * 1024, 1024 * 1024))
        .idle_timeout(Duration::from_secs(30));

    let server = Server::bind("127.0.0.1:8080").await?.with_config(config);
    tracing::info!(address = %server.local_addr(), "hello_world example ready");
    server.serve(chain.compose()).await?;
    Ok(())
}
