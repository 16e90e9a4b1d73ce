// src/core/handler/dispatcher.rs

//! Receives a connection's handshake and frame notifications and decides what to
//! do with them.
//!
//! Control frames are answered here directly. Text frames are treated as command
//! names and routed through the `CommandRegistry`: a synchronous handler runs
//! inline and its reply is written before the next frame is read, an asynchronous
//! handler is spawned and left to run on its own.

use super::registry::{CommandRegistry, Route};
use crate::connection::Client;
use crate::core::WsError;
use crate::core::metrics;
use crate::core::protocol::{Frame, HandshakeRequest, OpCode};
use bytes::Bytes;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

/// Longest command prefix echoed into log lines.
const COMMAND_PREVIEW_LEN: usize = 32;

/// The next step for the connection's read loop to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    Close,
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Answers the upgrade request. Called once per connection.
    pub async fn on_handshake(&self, client: &Arc<Client>, request: &str) -> Result<(), WsError> {
        let request = HandshakeRequest::parse(request)?;
        let response = request.response()?;
        client.send_raw(Bytes::from(response)).await?;
        if !client.mark_handshake_complete() {
            warn!("Client {}: handshake completed twice", client.id());
        }
        info!(
            "Handshake completed for client {} from {} on {}",
            client.id(),
            client.addr(),
            request.path
        );
        Ok(())
    }

    /// Handles one decoded frame from a connection in data mode.
    pub async fn on_frame(&self, client: &Arc<Client>, frame: Frame) -> Result<NextAction, WsError> {
        metrics::FRAMES_RECEIVED_TOTAL
            .with_label_values(&[frame.opcode.name()])
            .inc();

        if !frame.masked {
            return Err(WsError::UnmaskedFrame);
        }

        match frame.opcode {
            OpCode::Text if frame.fin => {
                self.dispatch_text(client, &frame).await?;
            }
            OpCode::Text | OpCode::Continuation => {
                debug!(
                    "Client {}: ignoring fragmented {} frame",
                    client.id(),
                    frame.opcode.name()
                );
            }
            OpCode::Binary => {
                debug!(
                    "Client {}: ignoring binary frame of {} bytes",
                    client.id(),
                    frame.payload.len()
                );
            }
            OpCode::Ping => {
                debug!("Client {}: ping received, sending pong", client.id());
                client.send(Frame::pong(frame.payload)).await?;
            }
            OpCode::Pong => {
                debug!("Client {}: pong received, peer is alive", client.id());
                client.record_pong();
            }
            OpCode::Close => {
                info!("Client {}: close frame received", client.id());
                // The peer may already be gone; the connection closes either way.
                client.send_close().await;
                return Ok(NextAction::Close);
            }
            OpCode::Reserved(code) => {
                debug!(
                    "Client {}: ignoring frame with reserved opcode {:#x}",
                    client.id(),
                    code
                );
            }
        }
        Ok(NextAction::Continue)
    }

    async fn dispatch_text(&self, client: &Arc<Client>, frame: &Frame) -> Result<(), WsError> {
        let command = frame.as_text()?;
        let span = info_span!(
            "command",
            name = %preview(command),
            client.id = %client.id(),
            client.addr = %client.addr(),
        );

        async move {
            let start_time = Instant::now();
            let result = match self.registry.lookup(command) {
                Some(Route::Sync(handler)) => {
                    metrics::COMMANDS_DISPATCHED_TOTAL
                        .with_label_values(&["sync"])
                        .inc();
                    let reply = catch_unwind(AssertUnwindSafe(|| handler(client, command)))
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));
                    match reply {
                        Ok(reply) if reply.is_empty() => Ok(()),
                        Ok(reply) => client.send(Frame::text(&reply)).await,
                        Err(e) => {
                            metrics::HANDLER_FAILURES_TOTAL.inc();
                            warn!("Handler for '{}' failed: {:#}", preview(command), e);
                            Err(WsError::from(e))
                        }
                    }
                }
                Some(Route::Async(handler)) => {
                    metrics::COMMANDS_DISPATCHED_TOTAL
                        .with_label_values(&["async"])
                        .inc();
                    let task = handler(client.clone());
                    let client_id = client.id();
                    tokio::spawn(
                        async move {
                            task.await;
                            debug!("Asynchronous handler for client {} finished", client_id);
                        }
                        .in_current_span(),
                    );
                    Ok(())
                }
                None => {
                    metrics::UNKNOWN_COMMANDS_TOTAL.inc();
                    info!("Command '{}' not found", preview(command));
                    Ok(())
                }
            };
            metrics::DISPATCH_LATENCY_SECONDS.observe(start_time.elapsed().as_secs_f64());
            result
        }
        .instrument(span)
        .await
    }
}

/// Cuts `command` down for logging, on a char boundary.
fn preview(command: &str) -> &str {
    match command.char_indices().nth(COMMAND_PREVIEW_LEN) {
        Some((idx, _)) => &command[..idx],
        None => command,
    }
}
