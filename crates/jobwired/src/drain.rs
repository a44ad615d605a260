//! Drain loop — takes finished jobs off the completion engine and writes
//! their responses to the controller.
//!
//! Exactly one drain loop runs per worker, so responses reach the
//! connection from a single task. A failed job, a failed encode or a failed
//! write is logged and the loop moves on to the next completion.

use tokio::sync::broadcast;

use jobwire_core::wire::Envelope;
use jobwire_services::{Completion, Completions, ConnectionContext};

/// What happened to one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the live connection.
    Written,
    /// No connection; the response was dropped.
    Discarded,
    /// Encoding or writing failed; the response was dropped.
    Failed,
}

pub struct DrainLoop {
    completions: Completions,
    connection: ConnectionContext,
    shutdown: broadcast::Receiver<()>,
}

impl DrainLoop {
    pub fn new(
        completions: Completions,
        connection: ConnectionContext,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            completions,
            connection,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("drain loop shutting down");
                    return Ok(());
                }

                next = self.completions.take() => {
                    let Some(completion) = next else {
                        tracing::info!("completion engine dropped, drain loop exiting");
                        return Ok(());
                    };
                    self.publish(completion);
                }
            }
        }
    }

    /// Write one completion to the current connection, if there is one.
    pub fn publish(&self, completion: Completion) -> Delivery {
        let response = match completion {
            Ok(response) => response,
            Err(failure) => {
                tracing::warn!(rid = failure.rid, reason = %failure.reason, "sending error response for failed job");
                failure.into_response()
            }
        };

        let Some(connection) = self.connection.current() else {
            tracing::debug!(rid = response.rid, "no controller connection, discarding response");
            return Delivery::Discarded;
        };

        let envelope = match Envelope::response(&response) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(rid = response.rid, error = %e, "failed to encode response");
                return Delivery::Failed;
            }
        };

        match connection.send(envelope.encode()) {
            Ok(()) => {
                tracing::debug!(rid = response.rid, connection = connection.id(), "response written");
                Delivery::Written
            }
            Err(e) => {
                tracing::warn!(rid = response.rid, error = %e, "failed to write response");
                Delivery::Failed
            }
        }
    }
}
