//! Runtime thread for ditty.
//!
//! The runtime thread is the driver of the window scheduler. It:
//! - Asks the window clock for every window due within the lookahead
//! - Evaluates each one against a fresh registry snapshot
//! - Pushes the resulting events into the output channel
//! - Flushes pending stop events on shutdown

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventTemplate, LoopChange, ScheduledEvent};
use crate::registry::SharedRegistry;
use crate::runtime::RuntimeMessage;
use crate::scheduler::WindowScheduler;
use crate::timing::{validate_bpm, Clock, SystemClock, WindowClock};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the running scheduler.
///
/// Loop edits are applied to the shared registry directly and are visible
/// to the next window; tempo changes travel to the thread as messages.
#[derive(Clone)]
pub struct RuntimeHandle {
    /// Sender for runtime messages.
    message_tx: Sender<RuntimeMessage>,
    /// Registry read by the scheduler thread.
    registry: SharedRegistry,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
}

impl RuntimeHandle {
    /// Send a message to the runtime thread.
    pub fn send(&self, msg: RuntimeMessage) -> Result<()> {
        self.message_tx.send(msg).map_err(|_| Error::Disconnected)
    }

    /// The registry the scheduler reads from.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Insert, update or delete a loop.
    pub fn set_loop(
        &self,
        id: impl Into<String>,
        events: Vec<EventTemplate>,
        length: Option<f64>,
    ) -> Result<LoopChange> {
        self.registry.set_loop(id, events, length)
    }

    /// Delete a loop. Its pending stop events are flushed by the next window.
    pub fn remove_loop(&self, id: impl Into<String>) -> LoopChange {
        self.registry.remove_loop(id)
    }

    /// Change the tempo from the next window on.
    ///
    /// Tempos outside `MIN_BPM..=MAX_BPM` are rejected before reaching
    /// the thread.
    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        let bpm = validate_bpm(bpm)?;
        self.send(RuntimeMessage::SetBpm { bpm })
    }

    /// Emit all pending stop events immediately.
    pub fn flush_stops(&self) -> Result<()> {
        self.send(RuntimeMessage::FlushStops)
    }

    /// Signal the runtime thread to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The running scheduler thread.
///
/// Dropping the runtime shuts it down and joins the thread.
pub struct Runtime {
    handle: RuntimeHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Start the scheduler thread on the system clock.
    ///
    /// Event times are seconds since the start of the runtime.
    pub fn start(
        config: &Config,
        registry: SharedRegistry,
        sink: Sender<ScheduledEvent>,
    ) -> Result<Self> {
        Self::start_with_clock(config, registry, sink, SystemClock::new())
    }

    /// Start the scheduler thread on a custom clock.
    ///
    /// The same clock drives window generation and the emission deadline.
    pub fn start_with_clock<C>(
        config: &Config,
        registry: SharedRegistry,
        sink: Sender<ScheduledEvent>,
        clock: C,
    ) -> Result<Self>
    where
        C: Clock + Clone + Send + 'static,
    {
        config.validate()?;

        let (message_tx, message_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = RuntimeHandle {
            message_tx,
            registry: registry.clone(),
            shutdown: shutdown.clone(),
        };

        let mut rt = RuntimeThread::new(config, registry, message_rx, sink, clock)?;
        let overrun = rt.scheduler.overrun_policy();
        let thread_shutdown = shutdown.clone();
        let thread_handle = thread::Builder::new()
            .name("ditty-scheduler".to_string())
            .spawn(move || rt.run(thread_shutdown))?;

        log::info!(
            "Runtime started: {} BPM, {:?} windows, {:?} lookahead, {:?} on overrun",
            config.transport.bpm,
            config.transport.tick,
            config.transport.lookahead,
            overrun
        );

        Ok(Self {
            handle,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get a handle to interact with the runtime.
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Shut down the runtime and wait for the thread to finish.
    pub fn shutdown(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.handle.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| Error::Runtime("scheduler thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::error!("{}", e);
        }
    }
}

/// The thread that owns the scheduler and its deferred queue.
struct RuntimeThread<C: Clock> {
    scheduler: WindowScheduler<C>,
    window_clock: WindowClock,
    clock: C,
    registry: SharedRegistry,
    message_rx: Receiver<RuntimeMessage>,
    sink: Sender<ScheduledEvent>,
    /// Seconds ahead of the clock that windows are produced.
    lookahead: f64,
    /// Sleep between polls.
    interval: Duration,
}

impl<C: Clock + Clone> RuntimeThread<C> {
    fn new(
        config: &Config,
        registry: SharedRegistry,
        message_rx: Receiver<RuntimeMessage>,
        sink: Sender<ScheduledEvent>,
        clock: C,
    ) -> Result<Self> {
        let transport = &config.transport;
        let window_clock =
            WindowClock::new(transport.bpm, transport.tick.as_secs_f64(), clock.now())?;
        let interval = Duration::from_secs_f64(window_clock.tick() / 2.0);
        Ok(Self {
            scheduler: WindowScheduler::with_clock(&config.scheduler, clock.clone()),
            window_clock,
            clock,
            registry,
            message_rx,
            sink,
            lookahead: transport.lookahead.as_secs_f64(),
            interval: interval.max(Duration::from_millis(1)),
        })
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            self.drain_messages();
            self.tick();
            thread::sleep(self.interval);
        }

        let flushed = self.scheduler.flush_stops(self.clock.now(), &mut self.sink);
        log::info!(
            "Runtime stopped at beat {:.3} ({} pending stops flushed)",
            self.window_clock.position(),
            flushed
        );
    }

    /// Process all pending messages.
    fn drain_messages(&mut self) {
        while let Ok(msg) = self.message_rx.try_recv() {
            match msg {
                RuntimeMessage::SetBpm { bpm } => match self.window_clock.set_bpm(bpm) {
                    Ok(()) => log::info!(
                        "Tempo set to {:.1} BPM at beat {:.3}",
                        self.window_clock.bpm(),
                        self.window_clock.position()
                    ),
                    Err(e) => log::warn!("Ignoring tempo change: {}", e),
                },
                RuntimeMessage::FlushStops => {
                    let flushed = self.scheduler.flush_stops(self.clock.now(), &mut self.sink);
                    log::debug!("Flushed {} pending stops", flushed);
                }
            }
        }
    }

    fn tick(&mut self) {
        let horizon = self.clock.now() + self.lookahead;
        for window in self.window_clock.windows_until(horizon) {
            let loops = self.registry.snapshot();
            let report = self.scheduler.evaluate(&window, &loops, &mut self.sink);
            if report.total_emitted() > 0 {
                log::debug!(
                    "[TICK] beats {:.3}..{:.3}: {} events ({} carried over, {} queued)",
                    window.from,
                    window.to,
                    report.total_emitted(),
                    report.reconciled,
                    self.scheduler.deferred().len()
                );
            }
        }
    }
}
