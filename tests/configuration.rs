//! Listener configuration, lifecycle, and the admin API.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use stubwire::{
    MockServer, PortSetting, RequestPattern, ResponseTemplate, ServerConfig, ServerError,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_custom_host_and_port() {
    let port = free_port();
    let config = ServerConfig::default()
        .with_bind_address("127.0.0.1")
        .with_port(port);
    let server = MockServer::start(config).await.unwrap();
    assert_eq!(server.port(), port);
    assert_eq!(server.base_url(), format!("http://127.0.0.1:{}", port));

    server
        .stub(RequestPattern::get().url("/api/message"), ResponseTemplate::ok())
        .unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{}/api/message", port))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.stop().await;
}

#[tokio::test]
async fn test_dynamic_port() {
    let config = ServerConfig::from_yaml("bind_address: 127.0.0.1\nport: dynamic\n").unwrap();
    assert_eq!(config.port, PortSetting::Dynamic);

    let server = MockServer::start(config).await.unwrap();
    assert!(server.port() > 0);

    server
        .stub(RequestPattern::get().url("/api/message"), ResponseTemplate::ok())
        .unwrap();
    let response = reqwest::get(server.url("/api/message")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.stop().await;
}

#[tokio::test]
async fn test_port_in_use() {
    let first = MockServer::start(ServerConfig::dynamic()).await.unwrap();
    let err = MockServer::start(ServerConfig::dynamic().with_port(first.port()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ServerError::Bind { .. }));
    first.stop().await;
}

#[tokio::test]
async fn test_stubs_from_yaml() {
    let yaml = r#"
bind_address: 127.0.0.1
port: dynamic
stubs:
  - request:
      method: GET
      url: /api/message?id=1
    response:
      status: 200
      body:
        type: text
        content: Hello World!
"#;
    let server = MockServer::start(ServerConfig::from_yaml(yaml).unwrap())
        .await
        .unwrap();
    let body = reqwest::get(server.url("/api/message?id=1"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Hello World!");
    server.stop().await;
}

#[tokio::test]
async fn test_stop_releases_port() {
    let server = MockServer::start(ServerConfig::dynamic()).await.unwrap();
    let port = server.port();
    server.stop().await;

    let again = MockServer::start(ServerConfig::dynamic().with_port(port))
        .await
        .unwrap();
    again.stop().await;
}

#[tokio::test]
async fn test_stop_is_bounded_by_grace_period() {
    let mut config = ServerConfig::dynamic();
    config.shutdown_grace_ms = 200;
    let server = MockServer::start(config).await.unwrap();

    // A connection that never finishes its request.
    let mut stalled = TcpStream::connect(server.address()).await.unwrap();
    stalled.write_all(b"GET /slow HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop did not return within the grace period");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = ServerConfig::dynamic();
    config.max_body_bytes = 16;
    let server = MockServer::start(config).await.unwrap();
    server
        .stub(RequestPattern::post().url("/api/message"), ResponseTemplate::ok())
        .unwrap();
    let client = Client::new();

    let small = client
        .post(server.url("/api/message"))
        .body("Hello World!")
        .send()
        .await
        .unwrap();
    assert_eq!(small.status(), StatusCode::OK);

    let large = client
        .post(server.url("/api/message"))
        .body("x".repeat(64))
        .send()
        .await
        .unwrap();
    assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    server.stop().await;
}

#[tokio::test]
async fn test_admin_api() {
    let server = MockServer::start(ServerConfig::dynamic()).await.unwrap();
    let client = Client::new();

    let created = client
        .post(server.url("/__admin/mappings"))
        .body(
            r#"{"request": {"method": "GET", "url": "/api/message"},
                "response": {"status": 200, "body": {"type": "text", "content": "via admin"}}}"#,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let id = created.json::<serde_json::Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let body = client
        .get(server.url("/api/message"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "via admin");

    let listed: serde_json::Value = client
        .get(server.url("/__admin/mappings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);

    let deleted = client
        .delete(server.url(&format!("/__admin/mappings/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    assert!(server.stubs().is_empty());

    let rejected = client
        .post(server.url("/__admin/mappings"))
        .body(r#"{"request": {"url": "/a", "url_pattern": "/a.*"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    server.stop().await;
}

#[tokio::test]
async fn test_admin_disabled() {
    let server = MockServer::start(ServerConfig::dynamic().with_admin(false))
        .await
        .unwrap();
    let response = reqwest::get(server.url("/__admin/mappings")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.text().await.unwrap().contains("No stub mapping matched"));
    server.stop().await;
}
