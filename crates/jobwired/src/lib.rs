//! jobwired — worker daemon that takes job requests from a controller,
//! runs them concurrently and writes each response back as it finishes.

pub mod dispatch;
pub mod drain;
pub mod session;
pub mod worker;

pub use dispatch::{DispatchOutcome, Dispatcher, Ignored};
pub use drain::{Delivery, DrainLoop};
pub use session::WorkerSession;
pub use worker::Worker;
