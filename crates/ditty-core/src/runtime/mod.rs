//! Ditty Runtime - drives the window scheduler in real time.
//!
//! The runtime manages:
//! - The scheduler thread and its lifecycle
//! - The window clock (tempo, tick, lookahead)
//! - Message passing between callers and the scheduler thread

mod messages;
pub mod thread;

pub use messages::RuntimeMessage;
pub use thread::{Runtime, RuntimeHandle};
