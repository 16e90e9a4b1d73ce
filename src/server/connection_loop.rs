// src/server/connection_loop.rs

//! Contains the accept loop and the shutdown sequence that follows it.

use super::context::ServerContext;
use crate::connection::{Client, ConnectionGuard, ConnectionHandler};
use crate::core::WsError;
use crate::core::metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long connections get to wind down after the shutdown signal.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts connections until `Server::stop` is called or, when `handle_signals` is
/// set, SIGINT/SIGTERM arrives. Each connection runs on its own task.
pub async fn run(mut ctx: ServerContext, handle_signals: bool) -> Result<(), WsError> {
    let mut client_tasks = JoinSet::new();

    let mut signals = if handle_signals {
        Some((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    } else {
        None
    };

    loop {
        tokio::select! {
            biased;

            name = wait_for_signal(&mut signals) => {
                info!("{} received, initiating graceful shutdown.", name);
                break;
            }
            _ = ctx.shutdown_rx.recv() => {
                info!("Stop requested, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                if let Err(e) = res {
                    error!("Background task panicked: {e:?}");
                } else {
                    warn!("A background task finished unexpectedly.");
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => spawn_connection(&ctx, &mut client_tasks, socket, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection handler panicked: {e:?}");
                }
            },
        }
    }

    info!(
        "Shutting down after {} accepted and {} rejected connections. Sending signal to all connections.",
        ctx.state.stats.accepted(),
        ctx.state.stats.rejected()
    );
    let _ = ctx.shutdown_tx.send(());

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connections to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    ctx.background_tasks.shutdown().await;
    info!("Server shutdown complete.");
    Ok(())
}

/// Wraps an accepted socket in a `Client`, records it in the live set and starts
/// its read loop.
fn spawn_connection(
    ctx: &ServerContext,
    client_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
) {
    let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
        warn!(
            "Rejecting connection from {}: max_clients ({}) reached",
            addr, ctx.state.config.max_clients
        );
        ctx.state.stats.record_rejected();
        metrics::CONNECTIONS_REJECTED_TOTAL.inc();
        return;
    };

    info!("Accepted new connection from: {}", addr);
    ctx.state.stats.record_accepted();
    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

    if let Err(e) = socket.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let max_frame_size = ctx.state.config.max_frame_size;
    let (read_half, write_half) = socket.into_split();
    let (conn_shutdown_tx, conn_shutdown_rx) = broadcast::channel(1);
    let global_shutdown_rx = ctx.shutdown_tx.subscribe();

    let client = Arc::new(Client::new(
        addr,
        write_half,
        max_frame_size,
        conn_shutdown_tx,
    ));
    ctx.state.clients.insert(client.id(), client.clone());
    info!(
        "Client {} registered, {} connected",
        client.id(),
        ctx.state.clients.len()
    );

    let state = ctx.state.clone();
    client_tasks.spawn(async move {
        let _permit = permit;
        let _guard = ConnectionGuard::new(state.clone(), client.clone());
        let mut handler = ConnectionHandler::new(
            read_half,
            client,
            state.dispatcher.clone(),
            max_frame_size,
            conn_shutdown_rx,
            global_shutdown_rx,
        );
        if let Err(e) = handler.run().await {
            if !matches!(e, WsError::Io(_) | WsError::Handler(_)) {
                metrics::PROTOCOL_ERRORS_TOTAL.inc();
            }
            warn!("Connection from {} terminated unexpectedly: {}", addr, e);
        }
    });
}

async fn wait_for_signal(signals: &mut Option<(Signal, Signal)>) -> &'static str {
    match signals {
        Some((sigint, sigterm)) => tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        None => std::future::pending().await,
    }
}
