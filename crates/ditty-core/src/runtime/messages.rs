//! Messages for the runtime thread.
//!
//! Loop edits go straight to the shared registry; only changes to the
//! thread's own state travel as messages.

/// Messages sent to the runtime thread.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeMessage {
    /// Change the tempo from the next window on.
    SetBpm { bpm: f64 },

    /// Flush deferred stop events now, e.g. before a hard transport stop.
    FlushStops,
}
