//! jobwire-services — the worker's completion engine, connection context,
//! listener registry and job collaborators.

pub mod completion;
pub mod connection;
pub mod job;
pub mod listener;
mod panic;
pub mod process;

pub use completion::{Admission, Completion, CompletionEngine, Completions, EngineLimits, JobFailure, WorkUnit};
pub use connection::{ConnectionContext, ConnectionError, ConnectionHandle, ConnectionId};
pub use job::{JobCanceller, JobExecutor, RunningJob, RunningJobs, WorkContext};
pub use listener::{ListenerId, ListenerRegistry, ResponseListener};
pub use process::{ProcessCanceller, ProcessExecutor};
