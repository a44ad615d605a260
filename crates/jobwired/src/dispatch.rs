//! Routes inbound envelopes to job execution, cancellation, or listeners.

use std::sync::Arc;

use jobwire_core::wire::{Envelope, Kind, Operate, Request, WireError};
use jobwire_services::{
    Admission, CompletionEngine, JobCanceller, JobExecutor, WorkContext, WorkUnit,
};

/// Why an envelope produced no work and no notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    /// The frame could not be read as an envelope.
    MalformedEnvelope,
    /// The envelope kind is known but its body did not parse.
    MalformedBody(Kind),
    /// A request whose operation the worker does not handle.
    UnrecognizedOperation(Operate),
    /// An envelope kind the worker does not handle.
    UnrecognizedKind(u8),
}

/// What `dispatch` did with one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A unit was handed to the completion engine.
    Submitted { rid: u64, operate: Operate },
    /// The completion engine was saturated; an error response is on its way.
    Rejected { rid: u64, operate: Operate },
    /// Listeners were notified. `delivered` counts the ones that succeeded.
    Notified { kind: Kind, delivered: usize },
    Ignored(Ignored),
}

/// Classifies inbound envelopes. Runs on the connection's read task and
/// never blocks on job work.
pub struct Dispatcher {
    ctx: Arc<WorkContext>,
    engine: CompletionEngine,
    executor: Arc<dyn JobExecutor>,
    canceller: Arc<dyn JobCanceller>,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<WorkContext>,
        engine: CompletionEngine,
        executor: Arc<dyn JobExecutor>,
        canceller: Arc<dyn JobCanceller>,
    ) -> Self {
        Self {
            ctx,
            engine,
            executor,
            canceller,
        }
    }

    /// Decode one raw frame and dispatch it.
    pub fn dispatch_frame(&self, frame: &[u8]) -> DispatchOutcome {
        match Envelope::decode(frame) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "dropping malformed envelope");
                DispatchOutcome::Ignored(Ignored::MalformedEnvelope)
            }
        }
    }

    /// Dispatch one decoded envelope.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        match envelope.kind() {
            Ok(Kind::Request) => match envelope.decode_request() {
                Ok(request) => self.handle_request(request),
                Err(e) => malformed_body(Kind::Request, e),
            },
            Ok(Kind::Response) => match envelope.decode_response() {
                Ok(response) => {
                    let delivered = self.ctx.listeners.notify_response(&response);
                    tracing::debug!(rid = response.rid, delivered, "relayed response to listeners");
                    DispatchOutcome::Notified {
                        kind: Kind::Response,
                        delivered,
                    }
                }
                Err(e) => malformed_body(Kind::Response, e),
            },
            Ok(Kind::WebResponse) => match envelope.decode_web_response() {
                Ok(response) => {
                    let delivered = self.ctx.listeners.notify_web_response(&response);
                    tracing::debug!(rid = response.rid, delivered, "relayed web response to listeners");
                    DispatchOutcome::Notified {
                        kind: Kind::WebResponse,
                        delivered,
                    }
                }
                Err(e) => malformed_body(Kind::WebResponse, e),
            },
            Ok(Kind::WebRequest) | Err(_) => {
                tracing::error!(kind = envelope.kind_byte(), "unrecognized envelope kind, ignoring");
                DispatchOutcome::Ignored(Ignored::UnrecognizedKind(envelope.kind_byte()))
            }
        }
    }

    fn handle_request(&self, request: Request) -> DispatchOutcome {
        let rid = request.rid;
        let operate = request.operate;
        let unit = WorkUnit { rid, operate };
        let ctx = self.ctx.clone();

        let admission = if operate.is_execution() {
            // Called now so the executor can register the job before it
            // queues for a permit.
            self.engine.submit(unit, self.executor.execute(ctx, request))
        } else if operate == Operate::Cancel {
            // Cancels must not wait behind the jobs they target.
            self.engine
                .submit_unbounded(unit, self.canceller.cancel(ctx, request));
            Admission::Accepted
        } else {
            tracing::error!(rid, ?operate, "unrecognized request operation, ignoring");
            return DispatchOutcome::Ignored(Ignored::UnrecognizedOperation(operate));
        };

        match admission {
            Admission::Accepted => {
                tracing::debug!(rid, ?operate, "request submitted");
                DispatchOutcome::Submitted { rid, operate }
            }
            Admission::Rejected => DispatchOutcome::Rejected { rid, operate },
        }
    }
}

fn malformed_body(kind: Kind, error: WireError) -> DispatchOutcome {
    tracing::warn!(?kind, error = %error, "dropping envelope with malformed body");
    DispatchOutcome::Ignored(Ignored::MalformedBody(kind))
}
