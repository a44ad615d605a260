//! Controller session — the TCP connection to the controller.
//!
//! The worker dials the controller, publishes the connection in the
//! [`ConnectionContext`] while it is up, feeds every inbound frame to the
//! dispatcher, and redials after `reconnect_interval` when it drops.
//! Responses are written by a per-connection writer task fed from the
//! connection handle.

mod frame;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use jobwire_services::{ConnectionContext, ConnectionHandle};

use crate::dispatch::Dispatcher;

pub use frame::{read_frame, write_frames};

/// How long queued responses get to reach the socket at shutdown.
const WRITER_FLUSH: Duration = Duration::from_secs(1);

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Ended {
    Shutdown,
    Disconnected,
}

pub struct WorkerSession {
    address: String,
    reconnect_interval: Duration,
    connection: ConnectionContext,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Receiver<()>,
}

impl WorkerSession {
    pub fn new(
        address: String,
        reconnect_interval: Duration,
        connection: ConnectionContext,
        dispatcher: Arc<Dispatcher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            address,
            reconnect_interval,
            connection,
            dispatcher,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let connected = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("controller session shutting down");
                    return Ok(());
                }
                r = TcpStream::connect(&self.address) => r,
            };

            match connected {
                Ok(stream) => {
                    if self.serve(stream).await == Ended::Shutdown {
                        tracing::info!("controller session shutting down");
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %self.address, error = %e, "failed to connect to controller");
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("controller session shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }

    /// Serve one connection until it drops or shutdown is signalled.
    async fn serve(&mut self, stream: TcpStream) -> Ended {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address.clone());

        let (mut reader, writer) = stream.into_split();
        let (handle, frames) = ConnectionHandle::new(peer.clone());
        let id = handle.id();

        let mut writer_task = tokio::spawn(write_frames(writer, frames, id));
        self.connection.set(Arc::new(handle));
        tracing::info!(peer = %peer, connection = id, "controller connection active");

        let ended = loop {
            tokio::select! {
                _ = self.shutdown.recv() => break Ended::Shutdown,

                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => {
                        self.dispatcher.dispatch_frame(&frame);
                    }
                    Ok(None) => {
                        tracing::debug!(connection = id, "controller closed the connection");
                        break Ended::Disconnected;
                    }
                    Err(e) => {
                        tracing::warn!(connection = id, error = %e, "controller connection failed");
                        break Ended::Disconnected;
                    }
                },
            }
        };

        // Clear before stopping the writer so the drain loop stops queueing
        // frames for this connection.
        self.connection.clear(id);
        if ended == Ended::Shutdown {
            // Dropping the handle closes the queue; let already queued
            // responses reach the socket.
            if tokio::time::timeout(WRITER_FLUSH, &mut writer_task).await.is_err() {
                tracing::debug!(connection = id, "writer did not flush before shutdown");
                writer_task.abort();
            }
        } else {
            writer_task.abort();
        }
        tracing::warn!(peer = %peer, connection = id, "controller connection inactive");
        ended
    }
}
