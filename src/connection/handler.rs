// src/connection/handler.rs

//! Defines the `ConnectionHandler` which runs the read loop of a single connection.

use super::client::Client;
use crate::core::WsError;
use crate::core::handler::{Dispatcher, NextAction};
use crate::core::protocol::{Inbound, WsCodec};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    DataMode,
    Closed,
}

/// Owns the read half of a connection and feeds what it decodes to the `Dispatcher`.
pub struct ConnectionHandler<R> {
    reader: FramedRead<R, WsCodec>,
    client: Arc<Client>,
    dispatcher: Arc<Dispatcher>,
    state: ConnectionState,
    shutdown_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a new `ConnectionHandler`.
    ///
    /// `shutdown_rx` must be subscribed to the same channel the `Client` was built with.
    pub fn new(
        reader: R,
        client: Arc<Client>,
        dispatcher: Arc<Dispatcher>,
        max_frame_size: usize,
        shutdown_rx: broadcast::Receiver<()>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            reader: FramedRead::new(reader, WsCodec::server(max_frame_size)),
            client,
            dispatcher,
            state: ConnectionState::AwaitingHandshake,
            shutdown_rx,
            global_shutdown_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Runs the connection until the peer leaves, a close frame arrives, a protocol
    /// error occurs or a shutdown is signalled. The client is closed on every path.
    pub async fn run(&mut self) -> Result<(), WsError> {
        let result = self.read_loop().await;
        self.state = ConnectionState::Closed;
        self.client.close().await;
        result
    }

    async fn read_loop(&mut self) -> Result<(), WsError> {
        loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    info!("Connection {} received server shutdown signal.", self.client.addr());
                    self.client.send_close().await;
                    return Ok(());
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("Connection {} was closed locally.", self.client.addr());
                    return Ok(());
                }
                item = self.reader.next() => {
                    match item {
                        Some(Ok(inbound)) => {
                            if self.process(inbound).await? == NextAction::Close {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) if e.is_normal_disconnect() => {
                            debug!("Connection from {} closed by peer: {}", self.client.addr(), e);
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            debug!("Connection from {} closed by peer.", self.client.addr());
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn process(&mut self, inbound: Inbound) -> Result<NextAction, WsError> {
        match (self.state, inbound) {
            (ConnectionState::AwaitingHandshake, Inbound::Handshake(request)) => {
                self.dispatcher.on_handshake(&self.client, &request).await?;
                self.reader.decoder_mut().enter_frames();
                self.state = ConnectionState::DataMode;
                Ok(NextAction::Continue)
            }
            (ConnectionState::DataMode, Inbound::Frame(frame)) => {
                debug!(
                    "Client {}: received {} frame ({} bytes)",
                    self.client.id(),
                    frame.opcode.name(),
                    frame.payload.len()
                );
                self.dispatcher.on_frame(&self.client, frame).await
            }
            (state, inbound) => Err(WsError::Internal(format!(
                "unexpected {inbound:?} in state {state:?} (codec phase {:?})",
                self.reader.decoder().phase()
            ))),
        }
    }
}
