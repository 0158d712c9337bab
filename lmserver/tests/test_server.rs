use axum::Router;
use axum::routing::get;
use lmserver::{LogState, Server, ServerBuilder};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn raw_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_start_on_free_port_and_shutdown() {
    let mut server = ServerBuilder::new("LanMusicTest")
        .base_url("127.0.0.1")
        .http_port(0)
        .build();
    server.add_router("/ping", Router::new().route("/", get(|| async { "pong" })));

    let addr = server.start().await.unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));
    assert_eq!(server.info().http_port, addr.port());

    let response = raw_get(addr.port(), "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with("pong"));

    let response = raw_get(addr.port(), "/api-docs/openapi.json").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"title\":\"LanMusicTest\""));

    assert!(server.start().await.is_err());

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("server did not stop");
    assert!(TcpStream::connect(("127.0.0.1", addr.port())).await.is_err());
}

#[tokio::test]
async fn test_openapi_documents_are_merged() {
    let mut server = Server::new("LanMusicTest", "127.0.0.1", 0);
    let state = LogState::detached(10);
    server.add_openapi(
        lmserver::logs::create_logs_router(state),
        <lmserver::logs::LogsApiDoc as utoipa::OpenApi>::openapi(),
        "logs",
    );
    server.add_openapi(
        Router::new(),
        <lmserver::LanMusicApiDoc as utoipa::OpenApi>::openapi(),
        "lanmusic",
    );

    let doc = server.openapi();
    assert!(doc.paths.paths.contains_key("/api/logs/log_setup"));
    assert!(doc.paths.paths.contains_key("/api/lanmusic/tracks"));
    assert_eq!(doc.info.title, "LanMusicTest");
}
