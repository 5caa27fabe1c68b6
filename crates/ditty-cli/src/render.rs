//! Offline rendering of a loop file.
//!
//! Windows are generated back to back from beat 0 on a frozen clock, so the
//! emission deadline never interferes and the output is deterministic.

use crate::RenderArgs;
use anyhow::{Context, Result};
use ditty_core::{
    Config, LoopFile, LoopRegistry, ManualClock, ScheduledEvent, Window, WindowScheduler,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Render a loop file to JSON lines (standalone command with logger init).
pub fn render(args: RenderArgs) -> Result<()> {
    crate::init_logger();

    let mut config = crate::load_config(args.config.as_deref())?;
    if let Some(bpm) = args.bpm {
        config.transport.bpm = bpm;
    }

    log::info!("ditty render");
    log::info!("Input:  {}", args.file.display());

    let loops = LoopFile::load(&args.file)
        .with_context(|| format!("Failed to load loops from {}", args.file.display()))?;
    let mut registry = LoopRegistry::with_default_length(config.loops.default_length)?;
    loops.apply(&mut registry)?;

    let events = render_loops(&registry, &config, args.beats, args.window)?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => {
            log::info!("Output: {}", path.display());
            Box::new(BufWriter::new(File::create(path).with_context(|| {
                format!("Failed to create output file {}", path.display())
            })?))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for event in &events {
        crate::write_event(&mut writer, event)?;
    }
    writer.flush()?;

    log::info!("Rendered {} events over {} beats", events.len(), args.beats);
    Ok(())
}

/// Schedule `beats` beats of `registry` in windows of `window_beats`.
///
/// Stops still pending at the end are flushed at the end time. Fails if
/// `config` does not validate.
pub fn render_loops(
    registry: &LoopRegistry,
    config: &Config,
    beats: f64,
    window_beats: f64,
) -> Result<Vec<ScheduledEvent>> {
    config.validate()?;
    if !(window_beats.is_finite() && window_beats > 0.0) {
        anyhow::bail!("Window size must be a positive number of beats, got {window_beats}");
    }

    let beat_duration = 60.0 / config.transport.bpm;
    let mut scheduler = WindowScheduler::with_clock(&config.scheduler, ManualClock::new(0.0));
    let loops = registry.snapshot();

    let mut events = Vec::new();
    let mut window = Window::new(0.0, window_beats.min(beats), 0.0, beat_duration);
    while window.from < beats {
        let report = scheduler.evaluate(&window, &loops, &mut events);
        log::trace!(
            "beats {:.3}..{:.3}: {} events",
            window.from,
            window.to,
            report.total_emitted()
        );
        window = window.next();
    }

    let end_time = beats * beat_duration;
    let flushed = scheduler.flush_stops(end_time, &mut events);
    if flushed > 0 {
        log::debug!("Closed {} stops still pending at beat {}", flushed, beats);
    }
    Ok(events)
}
