//! Worker assembly — wires the completion engine, dispatcher, drain loop and
//! controller session together and spawns their tasks.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use jobwire_core::config::WorkerConfig;
use jobwire_services::{
    CompletionEngine, EngineLimits, JobCanceller, JobExecutor, ListenerRegistry, WorkContext,
};

use crate::dispatch::Dispatcher;
use crate::drain::DrainLoop;
use crate::session::WorkerSession;

/// A running worker. Dropping it does not stop the tasks; send on the
/// shutdown channel for that.
pub struct Worker {
    context: Arc<WorkContext>,
    dispatcher: Arc<Dispatcher>,
    pub session_task: JoinHandle<anyhow::Result<()>>,
    pub drain_task: JoinHandle<anyhow::Result<()>>,
}

impl Worker {
    /// Build the worker from `config` and spawn its session and drain tasks.
    pub fn start(
        config: &WorkerConfig,
        executor: Arc<dyn JobExecutor>,
        canceller: Arc<dyn JobCanceller>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let context = Arc::new(WorkContext::new(config.jobs.clone()));
        let limits = EngineLimits::from(&config.jobs);
        tracing::info!(
            max_concurrent = limits.max_concurrent,
            max_pending = limits.max_pending,
            work_dir = %config.jobs.work_dir.display(),
            "completion engine ready"
        );
        let (engine, completions) = CompletionEngine::new(limits);

        let dispatcher = Arc::new(Dispatcher::new(
            context.clone(),
            engine,
            executor,
            canceller,
        ));

        let drain_task = tokio::spawn(
            DrainLoop::new(
                completions,
                context.connection.clone(),
                shutdown.subscribe(),
            )
            .run(),
        );

        let session_task = tokio::spawn(
            WorkerSession::new(
                config.controller.address.clone(),
                config.controller.reconnect_interval(),
                context.connection.clone(),
                dispatcher.clone(),
                shutdown.subscribe(),
            )
            .run(),
        );

        Self {
            context,
            dispatcher,
            session_task,
            drain_task,
        }
    }

    pub fn context(&self) -> &Arc<WorkContext> {
        &self.context
    }

    /// Listener registry relayed controller responses are delivered to.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.context.listeners
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.context.connection.is_connected()
    }
}
