// tests/integration/dispatch_test.rs

//! Integration tests for routing text frames to registered command handlers.

use super::test_helpers::{TestServer, test_config};
use anyhow::anyhow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use ws_dispatch::core::protocol::OpCode;

// ===== Synchronous handlers =====

#[tokio::test]
async fn test_sync_handler_reply_is_sent() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("hello", |_, _| Ok("world".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("hello").await;
    assert_eq!(client.recv_text().await, "world");

    server.shutdown().await;
}

#[tokio::test]
async fn test_sync_handler_receives_request_and_client() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("whoami", |client, request| {
            Ok(format!("{request}:{}", client.addr().ip()))
        });
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("whoami").await;
    assert_eq!(client.recv_text().await, "whoami:127.0.0.1");

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_reply_sends_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = TestServer::with_setup(test_config(), move |s| {
        s.register_handler("quiet", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        });
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("quiet").await;
    client.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("known", |_, _| Ok("yes".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("unknown").await;
    client.expect_silence(Duration::from_millis(200)).await;

    client.send_text("known").await;
    assert_eq!(client.recv_text().await, "yes");

    server.shutdown().await;
}

#[tokio::test]
async fn test_command_names_are_exact() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("hello", |_, _| Ok("world".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("Hello").await;
    client.send_text("hello ").await;
    client.expect_silence(Duration::from_millis(200)).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_reregistering_replaces_handler() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("version", |_, _| Ok("1".to_string()));
        s.register_handler("version", |_, _| Ok("2".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("version").await;
    assert_eq!(client.recv_text().await, "2");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handlers_can_change_while_running() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_text("late").await;
    client.expect_silence(Duration::from_millis(100)).await;

    server
        .server
        .register_handler("late", |_, _| Ok("registered".to_string()));
    client.send_text("late").await;
    assert_eq!(client.recv_text().await, "registered");

    assert!(server.server.unregister_handler("late"));
    assert!(!server.server.unregister_handler("late"));
    client.send_text("late").await;
    client.expect_silence(Duration::from_millis(100)).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_replies_keep_request_order() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("a", |_, _| Ok("A".to_string()));
        s.register_handler("b", |_, _| Ok("B".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    for _ in 0..20 {
        client.send_text("a").await;
        client.send_text("b").await;
    }
    for _ in 0..20 {
        assert_eq!(client.recv_text().await, "A");
        assert_eq!(client.recv_text().await, "B");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_large_reply_uses_extended_length() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("big", |_, _| Ok("x".repeat(70_000)));
        s.register_handler("medium", |_, _| Ok("y".repeat(300)));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("medium").await;
    assert_eq!(client.recv_text().await.len(), 300);

    client.send_text("big").await;
    let reply = client.recv_text().await;
    assert_eq!(reply.len(), 70_000);
    assert!(reply.bytes().all(|b| b == b'x'));

    server.shutdown().await;
}

#[tokio::test]
async fn test_large_request_is_dispatched() {
    let command = "k".repeat(66_000);
    let expected = command.clone();
    let server = TestServer::with_setup(test_config(), move |s| {
        s.register_handler(expected, |_, request| Ok(request.len().to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text(&command).await;
    assert_eq!(client.recv_text().await, "66000");

    server.shutdown().await;
}

// ===== Failures =====

#[tokio::test]
async fn test_handler_error_closes_only_that_connection() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("fail", |_, _| Err(anyhow!("boom")));
        s.register_handler("ok", |_, _| Ok("fine".to_string()));
    })
    .await;
    let mut failing = server.connect().await;
    let mut healthy = server.connect().await;
    server.wait_for_connections(2).await;

    failing.send_text("fail").await;
    assert!(failing.expect_closed().await.is_empty());
    server.wait_for_connections(1).await;

    healthy.send_text("ok").await;
    assert_eq!(healthy.recv_text().await, "fine");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_closes_only_that_connection() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_handler("panic", |_, _| panic!("handler exploded"));
        s.register_handler("ok", |_, _| Ok("fine".to_string()));
    })
    .await;
    let mut failing = server.connect().await;
    let mut healthy = server.connect().await;
    server.wait_for_connections(2).await;

    failing.send_text("panic").await;
    assert!(failing.expect_closed().await.is_empty());
    server.wait_for_connections(1).await;

    healthy.send_text("ok").await;
    assert_eq!(healthy.recv_text().await, "fine");

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_utf8_text_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;

    let frame = ws_dispatch::core::Frame::new(OpCode::Text, vec![0xff, 0xfe, 0xfd]);
    client.send_frame(&frame).await;

    assert!(client.expect_closed().await.is_empty());
    server.wait_for_connections(0).await;

    server.shutdown().await;
}

// ===== Asynchronous handlers =====

#[tokio::test]
async fn test_async_handler_streams_to_client() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_async_handler("count", |client| async move {
            for i in 0..3 {
                if !client.send_text(&i.to_string()).await {
                    break;
                }
            }
        });
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("count").await;
    assert_eq!(client.recv_text().await, "0");
    assert_eq!(client.recv_text().await, "1");
    assert_eq!(client.recv_text().await, "2");

    server.shutdown().await;
}

#[tokio::test]
async fn test_async_handler_does_not_block_reads() {
    let server = TestServer::with_setup(test_config(), |s| {
        s.register_async_handler("slow", |client| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            client.send_text("slow done").await;
        });
        s.register_handler("fast", |_, _| Ok("fast done".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("slow").await;
    client.send_text("fast").await;

    assert_eq!(client.recv_text().await, "fast done");
    assert_eq!(client.recv_text().await, "slow done");

    server.shutdown().await;
}

#[tokio::test]
async fn test_sync_handler_wins_over_async_of_same_name() {
    let async_calls = Arc::new(AtomicUsize::new(0));
    let counter = async_calls.clone();
    let server = TestServer::with_setup(test_config(), move |s| {
        s.register_async_handler("both", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        s.register_handler("both", |_, _| Ok("sync".to_string()));
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("both").await;
    assert_eq!(client.recv_text().await, "sync");
    client.expect_silence(Duration::from_millis(100)).await;
    assert_eq!(async_calls.load(Ordering::SeqCst), 0);

    // Once the synchronous handler goes, the asynchronous one is reachable.
    assert!(server.server.unregister_handler("both"));
    client.send_text("both").await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while async_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("async handler never ran");

    server.shutdown().await;
}

#[tokio::test]
async fn test_async_handler_sees_disconnect() {
    let finished = Arc::new(AtomicUsize::new(0));
    let flag = finished.clone();
    let server = TestServer::with_setup(test_config(), move |s| {
        s.register_async_handler("forever", move |client| {
            let flag = flag.clone();
            async move {
                while client.send_text("tick").await {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });
    })
    .await;
    let mut client = server.connect().await;

    client.send_text("forever").await;
    assert_eq!(client.recv_text().await, "tick");
    drop(client);

    tokio::time::timeout(Duration::from_secs(2), async {
        while finished.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("async handler did not notice the disconnect");

    server.shutdown().await;
}
