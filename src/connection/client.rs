// src/connection/client.rs

//! Defines `Client`, the shared handle to one accepted WebSocket connection.
//!
//! The read half of the socket is owned by the connection's `ConnectionHandler`
//! task; the write half lives here, behind a mutex, so that the handler and any
//! number of application handler tasks can send frames without interleaving bytes.

use crate::core::WsError;
use crate::core::protocol::{Frame, WsCodec};
use bytes::Bytes;
use futures::{Sink, SinkExt};
use parking_lot::Mutex as SyncMutex;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, broadcast};
use tokio_util::codec::FramedWrite;
use tracing::debug;
use uuid::Uuid;

/// A process-unique identifier for a connection.
pub type ClientId = Uuid;

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Upper bound on a best-effort close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(500);
/// Upper bound on shutting the write half down in `close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A point-in-time view of a connection, for introspection and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub age: Duration,
    pub handshake_complete: bool,
    /// Time since the last pong, if the peer ever sent one.
    pub last_pong: Option<Duration>,
}

pub struct Client {
    id: ClientId,
    addr: SocketAddr,
    created: Instant,
    writer: Mutex<FramedWrite<BoxedWriter, WsCodec>>,
    handshake_complete: AtomicBool,
    closed: AtomicBool,
    last_pong: SyncMutex<Option<Instant>>,
    /// Wakes the connection's read loop when the connection is closed from elsewhere.
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("handshake_complete", &self.handshake_complete())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Wraps the write half of a connection. `shutdown_tx` must be the sender whose
    /// receiver the connection's read loop listens on.
    pub fn new<W>(
        addr: SocketAddr,
        writer: W,
        max_frame_size: usize,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        Self {
            id: Uuid::new_v4(),
            addr,
            created: Instant::now(),
            writer: Mutex::new(FramedWrite::new(writer, WsCodec::frames(max_frame_size))),
            handshake_complete: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_pong: SyncMutex::new(None),
            shutdown_tx,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The remote endpoint in `ip:port` form.
    pub fn remote_endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::Acquire)
    }

    /// Flips the handshake flag. Returns false if it was already set.
    pub(crate) fn mark_handshake_complete(&self) -> bool {
        !self.handshake_complete.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn record_pong(&self) {
        *self.last_pong.lock() = Some(Instant::now());
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            addr: self.addr,
            age: self.created.elapsed(),
            handshake_complete: self.handshake_complete(),
            last_pong: self.last_pong.lock().map(|at| at.elapsed()),
        }
    }

    /// Writes one frame. A failed write closes the connection, and closing the
    /// connection from elsewhere abandons a write that is still waiting.
    pub async fn send(&self, frame: Frame) -> Result<(), WsError> {
        self.write_item(frame).await
    }

    /// Writes bytes verbatim. Only used for the handshake response.
    pub(crate) async fn send_raw(&self, bytes: Bytes) -> Result<(), WsError> {
        self.write_item(bytes).await
    }

    /// Sends an empty close frame, giving up after `CLOSE_FRAME_TIMEOUT`.
    pub(crate) async fn send_close(&self) -> bool {
        match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, self.send(Frame::close())).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Client {}: close frame not sent: {}", self.id, e);
                false
            }
            Err(_) => {
                debug!("Client {}: writer busy, skipping close frame", self.id);
                false
            }
        }
    }

    async fn write_item<I>(&self, item: I) -> Result<(), WsError>
    where
        FramedWrite<BoxedWriter, WsCodec>: Sink<I, Error = WsError>,
    {
        // Subscribe before the closed check so a concurrent close is never missed.
        let mut closed_rx = self.shutdown_tx.subscribe();
        if self.is_closed() {
            return Err(WsError::ConnectionClosed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(item).await
        };
        tokio::select! {
            result = write => {
                if let Err(e) = &result {
                    self.fail(e);
                }
                result
            }
            _ = closed_rx.recv() => Err(WsError::ConnectionClosed),
        }
    }

    /// Sends a text frame, reporting success instead of an error.
    pub async fn send_text(&self, text: &str) -> bool {
        self.send_reporting(Frame::text(text)).await
    }

    pub async fn send_ping(&self) -> bool {
        self.send_reporting(Frame::ping()).await
    }

    pub async fn send_pong(&self) -> bool {
        self.send_reporting(Frame::pong(Bytes::new())).await
    }

    async fn send_reporting(&self, frame: Frame) -> bool {
        let opcode = frame.opcode;
        match self.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Client {}: failed to send {} frame: {}",
                    self.id,
                    opcode.name(),
                    e
                );
                false
            }
        }
    }

    /// Closes the connection: stops further writes, wakes the read loop and any
    /// pending writer, then shuts down the write half. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.get_mut().shutdown().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Client {}: error shutting down writer: {}", self.id, e),
            // The socket goes away with the last reference to the client.
            Err(_) => debug!("Client {}: writer stuck, leaving it to drop", self.id),
        }
    }

    /// Marks the connection dead after a write error, without touching the writer.
    fn fail(&self, e: &WsError) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Client {}: write failed, closing: {}", self.id, e);
            let _ = self.shutdown_tx.send(());
        }
    }
}
