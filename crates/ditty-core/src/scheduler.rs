//! Windowed trigger scheduler.
//!
//! Every call to [`WindowScheduler::evaluate`] turns one [`Window`] and one
//! registry snapshot into start/stop triggers:
//!
//! 1. Deferred events from earlier windows are emitted once the window has
//!    reached their position. Stop events of deleted loops are flushed
//!    immediately so nothing downstream stays triggered.
//! 2. Every template whose cyclic position lands in `[from, to)` yields a
//!    start and a stop event.
//! 3. New events are ordered by time and emitted if they fall before the
//!    window's end, subject to a processing deadline. Later ones are
//!    deferred.
//!
//! Event times are only fixed at emission; deferred events keep their
//! absolute beat position and are re-anchored to the window that emits them.

use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::mem;

use crate::config::{OverrunPolicy, SchedulerConfig};
use crate::events::{EventKind, LoopDescriptor, ScheduledEvent};
use crate::timing::{Clock, SystemClock, Window};

/// Downstream consumer of scheduled events.
///
/// Delivery is fire-and-forget: sinks cannot push back on the scheduler.
pub trait EventSink {
    fn push(&mut self, event: ScheduledEvent);
}

impl EventSink for Vec<ScheduledEvent> {
    fn push(&mut self, event: ScheduledEvent) {
        Vec::push(self, event);
    }
}

impl EventSink for Sender<ScheduledEvent> {
    fn push(&mut self, event: ScheduledEvent) {
        if self.send(event).is_err() {
            log::trace!("[SCHEDULER] event sink disconnected, discarding event");
        }
    }
}

/// Counters describing what one `evaluate` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowReport {
    /// Deferred events emitted this call (including forced flushes).
    pub reconciled: usize,
    /// Stop events flushed early because their loop was deleted.
    pub forced: usize,
    /// Newly generated events emitted this call.
    pub emitted: usize,
    /// Newly generated events deferred to a later window.
    pub deferred: usize,
    /// Events lost to the deadline under [`OverrunPolicy::Drop`].
    pub dropped: usize,
    /// Events put back on the queue under [`OverrunPolicy::Requeue`].
    pub requeued: usize,
}

impl WindowReport {
    /// Total number of events pushed to the sink.
    pub fn total_emitted(&self) -> usize {
        self.reconciled + self.emitted
    }
}

/// Smallest absolute position `>= from` congruent to `position` modulo `length`.
///
/// The result lies in `[from, from + length)`.
pub fn absolute_position(position: f64, from: f64, length: f64) -> f64 {
    let offset = wrap(position, length);
    let phase = wrap(from, length);
    let start = from - phase + offset;
    if start < from {
        start + length
    } else {
        start
    }
}

/// `value` reduced into `0.0..length`.
///
/// `rem_euclid` rounds tiny negative values up to `length` itself.
pub(crate) fn wrap(value: f64, length: f64) -> f64 {
    let wrapped = value.rem_euclid(length);
    if wrapped >= length {
        0.0
    } else {
        wrapped
    }
}

/// Windowed scheduler with a deferred queue retained across calls.
pub struct WindowScheduler<C: Clock = SystemClock> {
    queue: Vec<ScheduledEvent>,
    clock: C,
    deadline_fraction: f64,
    overrun: OverrunPolicy,
}

impl Default for WindowScheduler<SystemClock> {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl WindowScheduler<SystemClock> {
    /// Create a scheduler measuring deadlines on the system clock.
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: Clock> WindowScheduler<C> {
    /// Create a scheduler measuring deadlines on `clock`.
    pub fn with_clock(config: &SchedulerConfig, clock: C) -> Self {
        Self {
            queue: Vec::new(),
            clock,
            deadline_fraction: config.deadline_fraction,
            overrun: config.overrun,
        }
    }

    /// Events waiting for a later window, in queue order.
    pub fn deferred(&self) -> &[ScheduledEvent] {
        &self.queue
    }

    /// Policy applied to events that miss the deadline.
    pub fn overrun_policy(&self) -> OverrunPolicy {
        self.overrun
    }

    /// The deadline clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Schedule one window.
    ///
    /// Carried-over events are pushed first, then new events in time order.
    /// Windows must be contiguous (`from` equal to the previous `to`) for
    /// the cyclic alignment to neither skip nor repeat events.
    pub fn evaluate<S>(
        &mut self,
        window: &Window,
        loops: &[LoopDescriptor],
        sink: &mut S,
    ) -> WindowReport
    where
        S: EventSink + ?Sized,
    {
        let begin = self.clock.now();
        let deadline = begin + window.duration * self.deadline_fraction;
        let mut report = WindowReport::default();

        for event in self.reconcile(window, loops, &mut report) {
            sink.push(event);
        }

        let mut fresh = generate(window, loops);
        // ensure events stream in time sequence
        fresh.sort_by(|a, b| a.time.total_cmp(&b.time));

        let next_time = window.next_time();
        for event in fresh {
            if event.time >= next_time {
                self.queue.push(event);
                report.deferred += 1;
            } else if self.clock.now() < deadline {
                sink.push(event);
                report.emitted += 1;
            } else {
                match self.overrun {
                    OverrunPolicy::Drop => report.dropped += 1,
                    OverrunPolicy::Requeue => {
                        self.queue.push(event);
                        report.requeued += 1;
                    }
                }
            }
        }

        if report.dropped > 0 || report.requeued > 0 {
            log::warn!(
                "[SCHEDULER] window {:.3}..{:.3} missed its deadline: {} dropped, {} requeued",
                window.from,
                window.to,
                report.dropped,
                report.requeued
            );
        }
        log::trace!(
            "[SCHEDULER] window {:.3}..{:.3}: {} reconciled ({} forced), {} emitted, {} deferred, {} queued",
            window.from,
            window.to,
            report.reconciled,
            report.forced,
            report.emitted,
            report.deferred,
            self.queue.len()
        );
        report
    }

    /// Emit every deferred stop event at `time` and discard the rest.
    ///
    /// Used at shutdown so no triggered state outlives the scheduler.
    pub fn flush_stops<S>(&mut self, time: f64, sink: &mut S) -> usize
    where
        S: EventSink + ?Sized,
    {
        let mut flushed = 0;
        for mut event in mem::take(&mut self.queue) {
            if event.is_stop() {
                event.time = time;
                sink.push(event);
                flushed += 1;
            }
        }
        flushed
    }

    /// Take the deferred entries that are due in `window`, re-timed.
    ///
    /// Entries that stay are kept in their original relative order.
    fn reconcile(
        &mut self,
        window: &Window,
        loops: &[LoopDescriptor],
        report: &mut WindowReport,
    ) -> Vec<ScheduledEvent> {
        if self.queue.is_empty() {
            return Vec::new();
        }

        let live: HashSet<&str> = loops
            .iter()
            .filter(|descriptor| !descriptor.events.is_empty())
            .map(|descriptor| descriptor.id.as_str())
            .collect();

        let mut due = Vec::new();
        let mut pending = Vec::with_capacity(self.queue.len());
        for mut event in mem::take(&mut self.queue) {
            if window.to > event.position {
                event.time = window.time_at(event.position);
                due.push(event);
            } else if event.kind == EventKind::Stop && !live.contains(event.id.as_str()) {
                log::debug!(
                    "[SCHEDULER] flushing stop for deleted loop '{}' (was at beat {:.3})",
                    event.id,
                    event.position
                );
                event.time = window.time;
                event.position = window.from;
                report.forced += 1;
                due.push(event);
            } else {
                pending.push(event);
            }
        }
        self.queue = pending;

        due.sort_by(|a, b| a.time.total_cmp(&b.time));
        report.reconciled = due.len();
        due
    }
}

/// Start and stop events for every template firing in `window`.
fn generate(window: &Window, loops: &[LoopDescriptor]) -> Vec<ScheduledEvent> {
    let mut events = Vec::new();
    for descriptor in loops {
        if !(descriptor.length.is_finite() && descriptor.length > 0.0) {
            continue;
        }
        for template in &descriptor.events {
            let start = absolute_position(template.position, window.from, descriptor.length);
            // NaN positions fail both bounds and never fire
            if !(start >= window.from && start < window.to) {
                continue;
            }

            let start_time = window.time_at(start);
            events.push(ScheduledEvent {
                id: descriptor.id.clone(),
                kind: EventKind::Start,
                position: start,
                args: template.args.clone(),
                time: start_time,
            });
            events.push(ScheduledEvent {
                id: descriptor.id.clone(),
                kind: EventKind::Stop,
                position: start + template.duration,
                args: template.args.clone(),
                time: start_time + template.duration * window.beat_duration,
            });
        }
    }
    events
}
