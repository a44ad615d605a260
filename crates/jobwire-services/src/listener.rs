//! Listener registry — observers of results relayed through this worker.
//!
//! The listener list is stored behind an [`ArcSwap`]: notification loads a
//! snapshot without locking, while `add`/`remove` publish a new list. A
//! listener added or removed during a notification takes effect from the
//! next notification on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use jobwire_core::wire::{Response, WebResponse};

use crate::panic::panic_message;

/// Observer of inbound `RESPONSE` and `WEB_RESPONSE` envelopes.
///
/// Both callbacks run inline on the connection's read task and must return
/// quickly.
pub trait ResponseListener: Send + Sync {
    fn on_response(&self, response: &Response) -> anyhow::Result<()>;

    fn on_web_response(&self, response: &WebResponse) -> anyhow::Result<()>;
}

/// Token returned by [`ListenerRegistry::add`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    listener: Arc<dyn ResponseListener>,
}

/// Copy-on-write list of listeners, notified in registration order.
#[derive(Clone)]
pub struct ListenerRegistry {
    entries: Arc<ArcSwap<Vec<Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(ArcSwap::from_pointee(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn add(&self, listener: Arc<dyn ResponseListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { id, listener };
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(entry.clone());
            next
        });
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let previous = self.entries.rcu(|current| {
            current
                .iter()
                .filter(|e| e.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Notify every listener of a relayed response. Returns how many
    /// listeners handled it without error.
    pub fn notify_response(&self, response: &Response) -> usize {
        self.notify_each("response", |l| l.on_response(response))
    }

    /// Notify every listener of a relayed web response.
    pub fn notify_web_response(&self, response: &WebResponse) -> usize {
        self.notify_each("web_response", |l| l.on_web_response(response))
    }

    fn notify_each(
        &self,
        what: &'static str,
        call: impl Fn(&dyn ResponseListener) -> anyhow::Result<()>,
    ) -> usize {
        let snapshot = self.entries.load_full();
        let mut delivered = 0;

        for entry in snapshot.iter() {
            // A failing listener is logged and skipped; the rest still run.
            match catch_unwind(AssertUnwindSafe(|| call(entry.listener.as_ref()))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(listener = entry.id.0, kind = what, error = %e, "listener failed");
                }
                Err(panic) => {
                    tracing::error!(
                        listener = entry.id.0,
                        kind = what,
                        panic = %panic_message(panic.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }

        delivered
    }
}
