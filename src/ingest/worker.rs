use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::CaptureSource;
use crate::frame::{Frame, FrameSlot};

const IDLE_BACKOFF: Duration = Duration::from_millis(20);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const STOP_POLL: Duration = Duration::from_millis(20);
/// Repeat the capture-error warning every this many consecutive failures.
const ERROR_LOG_EVERY: u64 = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub errors: u64,
    /// Polls that returned no frame.
    pub idle: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    errors: AtomicU64,
    idle: AtomicU64,
}

/// Owns a source for the lifetime of the capture thread and releases it on
/// every exit path, panics included.
struct SourceGuard(Box<dyn CaptureSource>);

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.cleanup();
        log::info!("CaptureWorker: {} cleaned up", self.0.name());
    }
}

/// One capture thread feeding one `FrameSlot`.
pub struct CaptureWorker {
    name: String,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start capturing. A zero `frame_interval` captures as fast as the source allows.
    pub fn spawn(
        source: Box<dyn CaptureSource>,
        slot: Arc<FrameSlot<Frame>>,
        frame_interval: Duration,
    ) -> Result<Self> {
        let name = source.name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let thread_stop = stop.clone();
        let thread_counters = counters.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || {
                capture_loop(
                    SourceGuard(source),
                    slot,
                    frame_interval,
                    thread_stop,
                    thread_counters,
                )
            })
            .with_context(|| format!("spawn capture thread for {}", name))?;

        log::info!(
            "CaptureWorker: {} started (interval {} ms)",
            name,
            frame_interval.as_millis()
        );
        Ok(Self {
            name,
            stop,
            counters,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            idle: self.counters.idle.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Signal the thread and wait for it; the source is cleaned up before this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("CaptureWorker: {} thread panicked", self.name);
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut guard: SourceGuard,
    slot: Arc<FrameSlot<Frame>>,
    frame_interval: Duration,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let expected = guard.0.modality();
    let mut consecutive_errors: u64 = 0;
    let mut exhausted_logged = false;

    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        let pause = match guard.0.capture() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                exhausted_logged = false;
                if frame.modality != expected {
                    log::warn!(
                        "CaptureWorker: {} produced a {} frame, expected {}",
                        guard.0.name(),
                        frame.modality.as_str(),
                        expected.as_str()
                    );
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                } else {
                    slot.write(frame);
                    counters.frames.fetch_add(1, Ordering::Relaxed);
                }
                frame_interval.saturating_sub(started.elapsed())
            }
            Ok(None) => {
                if !exhausted_logged {
                    log::info!("CaptureWorker: {} has no frame available", guard.0.name());
                    exhausted_logged = true;
                }
                counters.idle.fetch_add(1, Ordering::Relaxed);
                IDLE_BACKOFF.max(frame_interval)
            }
            Err(err) => {
                consecutive_errors += 1;
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if consecutive_errors == 1 || consecutive_errors % ERROR_LOG_EVERY == 0 {
                    log::warn!(
                        "CaptureWorker: {} capture failed ({} in a row): {:#}",
                        guard.0.name(),
                        consecutive_errors,
                        err
                    );
                }
                ERROR_BACKOFF.max(frame_interval)
            }
        };
        sleep_unless_stopped(pause, &stop);
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline || stop.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
