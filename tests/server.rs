use std::{net::SocketAddr, time::Duration};

use h1chain::{
    http::{Response, StatusCode},
    middleware::{Chain, ErrorPage, HandlerError, RequestLogger, handler_fn},
    server::{Server, ServerConfig},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing_subscriber::EnvFilter;

// `RUST_LOG=h1chain=debug cargo test` shows the session logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(config: ServerConfig) -> SocketAddr {
    init_tracing();
    let chain = Chain::new()
        .with(RequestLogger)
        .with(ErrorPage::default())
        .with(handler_fn(|ctx, _next| {
            Box::pin(async move {
                match ctx.request().path() {
                    "/boom" => Err(HandlerError::from("handler blew up")),
                    path => {
                        let reply = format!("you asked for {path}");
                        ctx.set_response(Response::text(StatusCode::Ok, reply));
                        Ok(())
                    }
                }
            })
        }));

    let server = Server::bind("127.0.0.1:0")
        .await
        .unwrap()
        .with_config(config);
    let addr = server.local_addr();
    tokio::spawn(server.serve(chain.compose()));
    addr
}

#[tokio::test]
async fn serves_keep_alive_exchanges_over_tcp() {
    let addr = start(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let expected =
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 18\r\n\r\nyou asked for /one";
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), expected);

    stream
        .write_all(b"GET /two HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut rest = String::new();
    stream.read_to_string(&mut rest).await.unwrap();
    assert!(rest.ends_with("\r\n\r\nyou asked for /two"), "{rest}");
}

#[tokio::test]
async fn handler_errors_become_an_error_page() {
    let addr = start(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"GET /boom HTTP/1.1\r\n\r\n").await.unwrap();
    let mut out = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{out}");
    assert!(out.ends_with("Internal Server Error"));
}

#[tokio::test]
async fn idle_connections_are_reaped() {
    let config = ServerConfig::default()
        .idle_timeout(Duration::from_millis(100))
        .reap_interval(Duration::from_millis(20));
    let addr = start(config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut out = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("idle session was never closed")
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn bind_reports_address_in_use() {
    let first = Server::bind("127.0.0.1:0").await.unwrap();
    let taken = first.local_addr().to_string();

    let err = Server::bind(&taken).await.err().expect("second bind should fail");
    assert!(err.to_string().contains(&taken));
}
