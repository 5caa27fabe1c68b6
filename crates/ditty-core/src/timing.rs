//! Timing primitives for windowed scheduling.
//!
//! - [`Window`] - A beat range mapped onto a wall-clock range
//! - [`Clock`] - Monotonic seconds source used for deadlines and driving
//! - [`SystemClock`] / [`ManualClock`] - Real and controllable clocks
//! - [`WindowClock`] - Tempo-aware generator of contiguous windows

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// Upper bound on windows produced by one catch-up call before skipping.
const MAX_CATCH_UP_WINDOWS: usize = 64;

/// Slowest accepted tempo.
pub const MIN_BPM: f64 = 1.0;
/// Fastest accepted tempo.
pub const MAX_BPM: f64 = 999.0;

/// Check that `bpm` is a finite tempo within `MIN_BPM..=MAX_BPM`.
pub fn validate_bpm(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(Error::Config(format!(
            "tempo must be between {MIN_BPM} and {MAX_BPM} BPM, got {bpm}"
        )))
    }
}

/// One scheduling window: the beat range `[from, to)` and its wall-clock span.
///
/// All times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    /// First beat covered by this window.
    pub from: f64,
    /// Beat at which the next window starts.
    pub to: f64,
    /// Wall-clock time corresponding to `from`.
    pub time: f64,
    /// Wall-clock span of the window.
    pub duration: f64,
    /// Wall-clock seconds per beat.
    pub beat_duration: f64,
}

impl Window {
    /// Create a window whose wall-clock span is derived from the beat range.
    pub fn new(from: f64, to: f64, time: f64, beat_duration: f64) -> Self {
        Self {
            from,
            to,
            time,
            duration: (to - from) * beat_duration,
            beat_duration,
        }
    }

    /// Wall-clock time corresponding to `to`.
    #[inline]
    pub fn next_time(&self) -> f64 {
        self.time + self.duration
    }

    /// Map an absolute beat position onto this window's time base.
    #[inline]
    pub fn time_at(&self, position: f64) -> f64 {
        self.time + (position - self.from) * self.beat_duration
    }

    /// Number of beats covered.
    pub fn beats(&self) -> f64 {
        self.to - self.from
    }

    /// The window directly following this one, with the same span.
    pub fn next(&self) -> Self {
        Self {
            from: self.to,
            to: self.to + self.beats(),
            time: self.next_time(),
            duration: self.duration,
            beat_duration: self.beat_duration,
        }
    }
}

/// Source of monotonic time in seconds.
pub trait Clock {
    /// Current time in seconds since an arbitrary, fixed origin.
    fn now(&self) -> f64;
}

/// Clock backed by [`Instant`], counting from its creation.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one copy and hand the
/// other to a scheduler. An optional step advances the clock on every read,
/// which simulates work taking time between deadline polls.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicU64>,
    step: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `seconds`.
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(seconds.to_bits())),
            step: Arc::new(AtomicU64::new(0.0f64.to_bits())),
        }
    }

    /// Create a clock that advances by `step` seconds after every read.
    pub fn stepping(seconds: f64, step: f64) -> Self {
        let clock = Self::new(seconds);
        clock.step.store(step.to_bits(), Ordering::Relaxed);
        clock
    }

    /// Jump to an absolute time.
    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: f64) {
        self.set(self.peek() + seconds);
    }

    /// Read the time without applying the step.
    pub fn peek(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Relaxed))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        let now = self.peek();
        let step = f64::from_bits(self.step.load(Ordering::Relaxed));
        if step != 0.0 {
            self.set(now + step);
        }
        now
    }
}

/// Tempo-aware generator of contiguous windows.
///
/// Each window spans a fixed wall-clock `tick`; the beat span follows from
/// the current tempo. Tempo changes apply from the next window on, so
/// `from` of window N+1 always equals `to` of window N.
#[derive(Clone, Debug)]
pub struct WindowClock {
    bpm: f64,
    tick: f64,
    next_beat: f64,
    next_time: f64,
}

impl WindowClock {
    /// Create a window clock starting at beat 0 at wall-clock `start_time`.
    ///
    /// The tick is raised to at least one millisecond.
    pub fn new(bpm: f64, tick: f64, start_time: f64) -> Result<Self> {
        Ok(Self {
            bpm: validate_bpm(bpm)?,
            tick: tick.max(0.001),
            next_beat: 0.0,
            next_time: start_time,
        })
    }

    /// Current tempo.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Set the tempo for all windows not yet produced.
    ///
    /// An invalid tempo leaves the current one in place.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.bpm = validate_bpm(bpm)?;
        Ok(())
    }

    /// Wall-clock seconds per beat at the current tempo.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Wall-clock span of each window.
    pub fn tick(&self) -> f64 {
        self.tick
    }

    /// Beat at which the next window starts.
    pub fn position(&self) -> f64 {
        self.next_beat
    }

    /// Wall-clock time at which the next window starts.
    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    /// Produce the next window and advance.
    pub fn next_window(&mut self) -> Window {
        let beat_duration = self.beat_duration();
        let window = Window {
            from: self.next_beat,
            to: self.next_beat + self.tick / beat_duration,
            time: self.next_time,
            duration: self.tick,
            beat_duration,
        };
        self.next_beat = window.to;
        self.next_time = window.next_time();
        window
    }

    /// Produce every window starting before `horizon`.
    ///
    /// If the clock has fallen further behind than a bounded number of
    /// windows, the backlog is skipped rather than flooding the scheduler.
    pub fn windows_until(&mut self, horizon: f64) -> Vec<Window> {
        let backlog = ((horizon - self.next_time) / self.tick).ceil();
        if backlog > MAX_CATCH_UP_WINDOWS as f64 {
            let skipped = backlog as usize - MAX_CATCH_UP_WINDOWS;
            log::warn!(
                "window clock behind by {} windows, skipping {} (beat {:.3})",
                backlog as usize,
                skipped,
                self.next_beat
            );
            let span = skipped as f64;
            self.next_beat += span * self.tick / self.beat_duration();
            self.next_time += span * self.tick;
        }

        let mut windows = Vec::new();
        while self.next_time < horizon {
            windows.push(self.next_window());
        }
        windows
    }
}
