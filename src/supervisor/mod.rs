//! Supervision of the external detector: readiness tracking, command
//! queueing and the event-loop worker behind the public handle.

mod handle;
mod queue;
mod state;
pub(crate) mod worker;

pub use handle::*;
pub use queue::*;
pub use state::*;
pub use worker::{DEFAULT_TERMINATE_TIMEOUT, DETECT_COMMAND};
