//! Job collaborators — the seams the dispatcher hands requests to.
//!
//! The dispatcher never runs a job itself. It wraps a [`JobExecutor`] or
//! [`JobCanceller`] call in a completion unit and moves on; whatever
//! `Response` the collaborator yields is what the controller receives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::Notify;

use jobwire_core::config::JobSettings;
use jobwire_core::wire::{Request, Response};

use crate::connection::ConnectionContext;
use crate::listener::ListenerRegistry;

/// Worker-wide state shared by the dispatcher, the drain loop and the job
/// collaborators.
pub struct WorkContext {
    pub connection: ConnectionContext,
    pub listeners: ListenerRegistry,
    pub running: RunningJobs,
    pub settings: JobSettings,
}

impl WorkContext {
    pub fn new(settings: JobSettings) -> Self {
        Self {
            connection: ConnectionContext::new(),
            listeners: ListenerRegistry::new(),
            running: RunningJobs::new(),
            settings,
        }
    }
}

/// Runs `Schedule`, `Manual` and `Debug` requests.
///
/// `execute` is called when the request is dispatched; the returned future
/// only starts once the engine grants it a concurrency permit. Work done
/// before returning (such as registering in [`RunningJobs`]) is therefore
/// visible to a `Cancel` while the job is still queued.
///
/// Errors may be reported either inside the returned `Response` or as an
/// `Err`; the latter is turned into an error response by the drain loop.
pub trait JobExecutor: Send + Sync {
    fn execute(
        &self,
        ctx: Arc<WorkContext>,
        request: Request,
    ) -> BoxFuture<'static, anyhow::Result<Response>>;
}

/// Handles `Cancel` requests. Cancellation units bypass the engine's
/// concurrency and pending limits.
pub trait JobCanceller: Send + Sync {
    fn cancel(
        &self,
        ctx: Arc<WorkContext>,
        request: Request,
    ) -> BoxFuture<'static, anyhow::Result<Response>>;
}

// ── Running jobs ──────────────────────────────────────────────────────────────

/// Jobs currently executing on this worker, keyed by job id.
#[derive(Clone, Default)]
pub struct RunningJobs {
    jobs: Arc<DashMap<String, Arc<CancelSignal>>>,
}

#[derive(Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Registration of one running job. Dropping it removes the job.
pub struct RunningJob {
    key: String,
    signal: Arc<CancelSignal>,
    jobs: Arc<DashMap<String, Arc<CancelSignal>>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as running (or queued to run). `None` if a job with
    /// that key is already registered.
    pub fn register(&self, key: &str) -> Option<RunningJob> {
        match self.jobs.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let signal = Arc::new(CancelSignal::default());
                slot.insert(signal.clone());
                Some(RunningJob {
                    key: key.to_string(),
                    signal,
                    jobs: self.jobs.clone(),
                })
            }
        }
    }

    /// Signal the job to stop. Returns false if it is not running.
    pub fn cancel(&self, key: &str) -> bool {
        match self.jobs.get(key) {
            Some(signal) => {
                signal.cancelled.store(true, Ordering::Release);
                signal.notify.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl RunningJob {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once a cancel has been issued for this job.
    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the job has been cancelled. A cancel issued before this
    /// is awaited is not lost.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.signal.notify.notified().await;
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.jobs.remove(&self.key);
    }
}
