//! Completion engine — runs submitted job units concurrently and hands their
//! results back in the order they finish.
//!
//! `CompletionEngine::submit` spawns one task per unit and returns at once.
//! Every unit resolves to exactly one [`Completion`], which is pushed onto a
//! single channel; [`Completions::take`] pops them in completion order. A unit
//! that errors or panics still produces a completion (`Err(JobFailure)`), so
//! nothing is ever silently lost.
//!
//! Concurrency is bounded by a semaphore (`max_concurrent`) and admission by a
//! pending-unit ceiling (`max_pending`). Units over the ceiling are rejected
//! with an immediate failure completion rather than queued.
//! [`CompletionEngine::submit_unbounded`] bypasses both limits.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use jobwire_core::config::JobSettings;
use jobwire_core::wire::{Operate, Response};

use crate::panic::panic_message;

/// Identity of a submitted unit, used to answer for it when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    pub rid: u64,
    pub operate: Operate,
}

/// A unit that produced no response of its own.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operate:?} rid={rid} failed: {reason}")]
pub struct JobFailure {
    pub rid: u64,
    pub operate: Operate,
    pub reason: String,
}

impl JobFailure {
    fn new(unit: WorkUnit, reason: impl Into<String>) -> Self {
        Self {
            rid: unit.rid,
            operate: unit.operate,
            reason: reason.into(),
        }
    }

    /// Error response sent to the controller in place of a real result.
    pub fn into_response(self) -> Response {
        Response::error(self.rid, self.operate, self.reason)
    }
}

pub type Completion = Result<Response, JobFailure>;

/// Resource limits. Zero means unbounded for either field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_concurrent: usize,
    pub max_pending: usize,
}

impl From<&JobSettings> for EngineLimits {
    fn from(settings: &JobSettings) -> Self {
        Self {
            max_concurrent: settings.effective_max_concurrent(),
            max_pending: settings.max_pending_jobs as usize,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Pending ceiling reached. A failure completion was queued instead.
    Rejected,
}

/// Submission side. Cheap to clone; every clone feeds the same [`Completions`].
#[derive(Clone)]
pub struct CompletionEngine {
    tx: mpsc::UnboundedSender<Completion>,
    permits: Option<Arc<Semaphore>>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

/// Consumer side. Exactly one exists per engine.
pub struct Completions {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionEngine {
    pub fn new(limits: EngineLimits) -> (Self, Completions) {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = (limits.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(limits.max_concurrent)));

        tracing::debug!(
            max_concurrent = limits.max_concurrent,
            max_pending = limits.max_pending,
            "completion engine created"
        );

        let engine = Self {
            tx,
            permits,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: limits.max_pending,
        };
        (engine, Completions { rx })
    }

    /// Start `task` in the background. Never blocks; must be called from
    /// within a tokio runtime.
    pub fn submit<F>(&self, unit: WorkUnit, task: F) -> Admission
    where
        F: Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        let in_flight = self.pending.fetch_add(1, Ordering::AcqRel);
        if self.max_pending > 0 && in_flight >= self.max_pending {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                rid = unit.rid,
                operate = ?unit.operate,
                pending = in_flight,
                "worker saturated, rejecting job"
            );
            let failure = JobFailure::new(
                unit,
                format!("worker saturated: {in_flight} jobs pending"),
            );
            let _ = self.tx.send(Err(failure));
            return Admission::Rejected;
        }

        self.spawn_unit(unit, self.permits.clone(), Some(self.pending.clone()), task);
        Admission::Accepted
    }

    /// Start `task` outside the concurrency cap and the pending ceiling.
    ///
    /// For short control units such as cancellation, which have to run while
    /// every permit is held by the jobs they target.
    pub fn submit_unbounded<F>(&self, unit: WorkUnit, task: F)
    where
        F: Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        self.spawn_unit(unit, None, None, task);
    }

    fn spawn_unit<F>(
        &self,
        unit: WorkUnit,
        permits: Option<Arc<Semaphore>>,
        pending: Option<Arc<AtomicUsize>>,
        task: F,
    ) where
        F: Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let completion = run_unit(unit, permits, task).await;
            if let Some(pending) = pending {
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            if tx.send(completion).is_err() {
                tracing::debug!(rid = unit.rid, "completion receiver dropped");
            }
        });
    }

    /// Units admitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

async fn run_unit<F>(unit: WorkUnit, permits: Option<Arc<Semaphore>>, task: F) -> Completion
where
    F: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    let _permit = match permits {
        Some(semaphore) => match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return Err(JobFailure::new(unit, "job pool closed")),
        },
        None => None,
    };

    // Run the task on its own tokio task so a panic surfaces as a JoinError.
    match tokio::spawn(task).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            tracing::warn!(rid = unit.rid, operate = ?unit.operate, error = %e, "job failed");
            Err(JobFailure::new(unit, format!("{e:#}")))
        }
        Err(join) if join.is_panic() => {
            let reason = panic_message(join.into_panic().as_ref());
            tracing::error!(rid = unit.rid, operate = ?unit.operate, panic = %reason, "job panicked");
            Err(JobFailure::new(unit, format!("job panicked: {reason}")))
        }
        Err(_) => Err(JobFailure::new(unit, "job task cancelled")),
    }
}

impl Completions {
    /// Wait for the next finished unit.
    ///
    /// Returns `None` once every engine handle is dropped and all submitted
    /// units have been taken.
    pub async fn take(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }
}
