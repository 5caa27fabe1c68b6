//! Ditty Core - windowed scheduling of cyclic trigger loops.
//!
//! This crate turns a set of loops (cyclic patterns of event templates) into
//! a real-time stream of start/stop triggers, produced slightly ahead of
//! their due time for a downstream player:
//!
//! - **Events** - Templates, loops and scheduled triggers
//! - **Registry** - The set of live loops with change notifications
//! - **Timing** - Windows, clocks and the tempo-aware window clock
//! - **Scheduler** - The windowed scheduling algorithm and its deferred queue
//! - **Runtime** - A thread that drives the scheduler in real time
//! - **Config** - TOML configuration
//!
//! # Architecture
//!
//! A driver repeatedly hands the [`WindowScheduler`] a [`Window`] together
//! with a [`LoopRegistry`] snapshot. The scheduler emits what is due, keeps
//! what belongs to later windows in its deferred queue and flushes stop
//! events of loops that were deleted in the meantime. The [`Runtime`] is
//! one such driver; offline rendering is another.

pub mod config;
pub mod error;
pub mod events;
pub mod loop_file;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod timing;

pub use config::{Config, LoopsConfig, OverrunPolicy, SchedulerConfig, TransportConfig};
pub use error::{Error, Result};
pub use events::{
    Arg, EventKind, EventTemplate, Loop, LoopChange, LoopDescriptor, ScheduledEvent,
    DEFAULT_LOOP_LENGTH,
};
pub use loop_file::{LoopEntry, LoopFile};
pub use registry::{LoopRegistry, SharedRegistry};
pub use runtime::{Runtime, RuntimeHandle, RuntimeMessage};
pub use scheduler::{absolute_position, EventSink, WindowReport, WindowScheduler};
pub use timing::{
    validate_bpm, Clock, ManualClock, SystemClock, Window, WindowClock, MAX_BPM, MIN_BPM,
};
