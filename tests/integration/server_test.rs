// tests/integration/server_test.rs

//! Integration tests for the server lifecycle, the handshake and control frames.

use super::test_helpers::{SAMPLE_ACCEPT, TestClient, TestServer, test_config};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use ws_dispatch::config::Config;
use ws_dispatch::core::WsError;
use ws_dispatch::core::protocol::{Frame, OpCode};
use ws_dispatch::server::Server;

// ===== Handshake =====

#[tokio::test]
async fn test_handshake_returns_accept_key() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    let response = client.handshake().await;
    assert!(response.contains("Upgrade: websocket\r\n"));
    assert!(response.contains("Connection: Upgrade\r\n"));
    assert!(response.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n")));
    assert!(response.ends_with("\r\n\r\n"));

    server.wait_for_connections(1).await;
    let id = server.server.connection_ids()[0];
    let conn = server.server.connection(&id).unwrap();
    assert!(conn.handshake_complete());
    assert_eq!(conn.info().id, id);

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_split_across_writes() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send_raw(b"GET / HTTP/1.1\r\nHost: localhost\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .send_raw(b"Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n")
        .await;

    let response = client.read_response_head().await.unwrap();
    assert!(response.starts_with("HTTP/1.1 101"));
    assert!(response.contains(SAMPLE_ACCEPT));

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_and_first_frame_in_one_write() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("hello", |_, _| Ok("world".to_string()));
    })
    .await;
    let mut client = TestClient::connect(server.addr).await;

    let mut bytes = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n".to_vec();
    bytes.extend_from_slice(&Frame::text("hello").encode_masked([1, 2, 3, 4]));
    client.send_raw(&bytes).await;

    client.read_response_head().await.unwrap();
    assert_eq!(client.recv_text().await, "world");

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_key_closes_without_response() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send_raw(b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\r\n")
        .await;
    assert_eq!(client.read_response_head().await, None);
    server.wait_for_connections(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_non_http_peer_is_rejected() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send_raw(b"*1\r\n$4\r\nPING\r\n").await;
    assert_eq!(client.read_response_head().await, None);
    server.wait_for_connections(0).await;

    server.shutdown().await;
}

// ===== Control frames =====

#[tokio::test]
async fn test_ping_gets_exactly_one_pong() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send_frame(&Frame::new(OpCode::Ping, Bytes::from_static(b"beat")))
        .await;

    let pong = client.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, OpCode::Pong);
    assert!(pong.fin);
    assert!(!pong.masked);
    assert_eq!(pong.payload, Bytes::from_static(b"beat"));

    client.expect_silence(Duration::from_millis(200)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_pong_is_recorded_and_not_answered() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;
    let id = server.server.connection_ids()[0];
    assert_eq!(server.server.connection(&id).unwrap().info().last_pong, None);

    client.send_frame(&Frame::pong(Bytes::new())).await;
    client.expect_silence(Duration::from_millis(200)).await;

    let info = server.server.connection(&id).unwrap().info();
    assert!(info.last_pong.is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_frame_is_echoed_then_connection_ends() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;

    client.send_frame(&Frame::close()).await;

    let frames = client.expect_closed().await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, OpCode::Close);
    assert!(frames[0].payload.is_empty());
    server.wait_for_connections(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_unmasked_client_frame_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;

    client.send_raw(&Frame::text("hello").encode()).await;

    assert!(client.expect_closed().await.is_empty());
    server.wait_for_connections(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_and_reserved_frames_are_ignored() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("echo", |_, req| Ok(req.to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_frame(&Frame::binary(vec![1u8, 2, 3])).await;
    client
        .send_frame(&Frame::new(OpCode::Reserved(0x3), Bytes::from_static(b"x")))
        .await;
    client.send_text("echo").await;

    assert_eq!(client.recv_text().await, "echo");
    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let config = Config {
        max_frame_size: 1024,
        ..test_config()
    };
    let server = TestServer::with_setup(config, |_| {}).await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;

    client.send_text(&"a".repeat(2048)).await;

    assert!(client.expect_closed().await.is_empty());
    server.wait_for_connections(0).await;
    server.shutdown().await;
}

// ===== Server API =====

#[tokio::test]
async fn test_listen_twice_is_rejected() {
    let server = TestServer::start().await;

    let err = server.server.listen().await.unwrap_err();
    assert_eq!(err, WsError::AlreadyStarted);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bind_failure_is_reported_and_server_stays_startable() {
    let first = TestServer::start().await;

    let config = Config {
        port: first.addr.port(),
        ..test_config()
    };
    let second = Server::new(config);
    let err = second.listen().await.unwrap_err();
    assert!(matches!(err, WsError::Io(_)), "got {err:?}");

    // A failed bind does not count as started.
    let err = second.listen().await.unwrap_err();
    assert!(matches!(err, WsError::Io(_)), "got {err:?}");
    assert_eq!(second.local_addr(), None);

    first.shutdown().await;
}

#[tokio::test]
async fn test_run_without_listen_fails() {
    let server = Server::new(test_config());
    let err = server.run().await.unwrap_err();
    assert!(matches!(err, WsError::Internal(_)));
}

#[tokio::test]
async fn test_server_write_ping_and_pong() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;

    let id = server.server.connection_ids()[0];
    let conn = server.server.connection(&id).unwrap();

    assert!(server.server.write(&conn, "pushed").await);
    assert_eq!(client.recv_text().await, "pushed");

    assert!(server.server.ping(&conn).await);
    let ping = client.recv_frame().await.unwrap();
    assert_eq!(ping.opcode, OpCode::Ping);
    assert!(ping.payload.is_empty());

    assert!(server.server.pong(&conn).await);
    let pong = client.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, OpCode::Pong);
    assert!(pong.payload.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_write_after_disconnect_returns_false() {
    let server = TestServer::start().await;
    let client = server.connect().await;
    server.wait_for_connections(1).await;

    let id = server.server.connection_ids()[0];
    let conn = server.server.connection(&id).unwrap();

    drop(client);
    server.wait_for_connections(0).await;

    assert!(conn.is_closed());
    assert!(!server.server.write(&conn, "late").await);
    assert!(!server.server.ping(&conn).await);
    assert!(server.server.connection(&id).is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_connection_set_tracks_clients() {
    let server = TestServer::start().await;

    let a = server.connect().await;
    let b = server.connect().await;
    let _c = server.connect().await;
    server.wait_for_connections(3).await;

    let ids = server.server.connection_ids();
    assert_eq!(ids.len(), 3);
    for id in &ids {
        let conn = server.server.connection(id).unwrap();
        assert_eq!(conn.remote_endpoint(), conn.addr().to_string());
    }

    drop(a);
    drop(b);
    server.wait_for_connections(1).await;
    assert_eq!(server.server.stats().accepted(), 3);
    assert_eq!(server.server.stats().rejected(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_clients_rejects_excess_connections() {
    let config = Config {
        max_clients: 1,
        ..test_config()
    };
    let server = TestServer::with_setup(config, |_| {}).await;

    let _first = server.connect().await;
    server.wait_for_connections(1).await;

    let mut second = TestClient::connect(server.addr).await;
    assert_eq!(second.read_response_head().await, None);
    assert_eq!(server.server.connection_count(), 1);
    assert_eq!(server.server.stats().rejected(), 1);
    assert_eq!(server.server.stats().accepted(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_sends_close_to_every_client() {
    let server = TestServer::start().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    server.wait_for_connections(2).await;

    server.server.stop();

    for client in [&mut a, &mut b] {
        let frames = client.expect_closed().await;
        let last = frames.last().expect("a close frame");
        assert_eq!(last.opcode, OpCode::Close);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_handle_is_shareable() {
    let server = Arc::new(Server::new(test_config()));
    let addr = server.listen().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let runner = server.clone();
    let task = tokio::spawn(async move { runner.run().await });

    server.stop();
    let result = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let metrics_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = test_config();
    config.metrics.enabled = true;
    config.metrics.port = metrics_port;
    let server = TestServer::with_setup(config, |_| {}).await;
    let _client = server.connect().await;
    server.wait_for_connections(1).await;

    let body = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(mut stream) =
                tokio::net::TcpStream::connect(("127.0.0.1", metrics_port)).await
            {
                stream
                    .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .await
                    .unwrap();
                let mut body = String::new();
                stream.read_to_string(&mut body).await.unwrap();
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("metrics endpoint never came up");

    assert!(body.starts_with("HTTP/1.1 200"), "got: {body}");
    assert!(body.contains("ws_dispatch_connected_clients"));

    server.shutdown().await;
}
