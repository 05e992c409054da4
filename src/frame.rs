//! Frames and the latest-value handoff between capture and fusion.
//!
//! - `Frame`: immutable pixel buffer tagged with modality and capture time.
//! - `FrameSlot`: single-producer/single-consumer latest-value buffer.
//!
//! A `FrameSlot` never blocks its producer. Writing into a full slot discards
//! the oldest pending item. Reading waits at most the given timeout and then
//! falls back to the last item it delivered, so a consumer paired with a lagging
//! producer keeps running on stale data instead of stalling.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default number of pending items held by a `FrameSlot`.
pub const DEFAULT_SLOT_CAPACITY: usize = 1;

/// Seconds since the unix epoch as a float, the timestamp unit used on the wire.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Which sensor (or derived view) a frame came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Rgb,
    IrRaw16,
    IrVisualized,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Rgb => "rgb",
            Modality::IrRaw16 => "ir_raw16",
            Modality::IrVisualized => "ir_visualized",
        }
    }
}

/// Pixel storage for a frame. Rows are contiguous, channels interleaved.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    /// 8-bit RGB, 3 bytes per pixel.
    Rgb8(Vec<u8>),
    /// 8-bit single channel.
    Gray8(Vec<u8>),
    /// 16-bit single channel (radiometric IR).
    Gray16(Vec<u16>),
}

impl PixelData {
    pub fn channels(&self) -> usize {
        match self {
            PixelData::Rgb8(_) => 3,
            PixelData::Gray8(_) | PixelData::Gray16(_) => 1,
        }
    }

    /// Number of samples (not bytes).
    pub fn len(&self) -> usize {
        match self {
            PixelData::Rgb8(v) | PixelData::Gray8(v) => v.len(),
            PixelData::Gray16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A captured frame.
///
/// Pixels sit behind an `Arc` and are never mutated after construction, so
/// cloning a frame out of a `FrameSlot` is cheap and no two threads can observe
/// a partially rewritten buffer.
#[derive(Clone, Debug)]
pub struct Frame {
    pub modality: Modality,
    pub width: u32,
    pub height: u32,
    /// Capture time in unix seconds, assigned by the producer.
    pub timestamp: f64,
    pixels: Arc<PixelData>,
}

impl Frame {
    pub fn new(
        modality: Modality,
        width: u32,
        height: u32,
        timestamp: f64,
        pixels: PixelData,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(pixels.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "{} frame length mismatch: expected {} samples, got {}",
                modality.as_str(),
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            modality,
            width,
            height,
            timestamp,
            pixels: Arc::new(pixels),
        })
    }

    pub fn pixels(&self) -> &PixelData {
        &self.pixels
    }

    /// Seconds elapsed since capture. Negative clock skew reads as zero.
    pub fn age_secs(&self) -> f64 {
        (unix_now() - self.timestamp).max(0.0)
    }

    /// Min-max normalise a raw16 IR frame into an 8-bit visualisation.
    pub fn visualize(&self) -> Result<Frame> {
        let PixelData::Gray16(raw) = self.pixels() else {
            return Err(anyhow!(
                "cannot visualise {} frame, raw16 required",
                self.modality.as_str()
            ));
        };
        let (min, max) = raw
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = max.saturating_sub(min) as u32;
        let gray = raw
            .iter()
            .map(|&v| {
                if span == 0 {
                    0
                } else {
                    (((v - min) as u32 * 255) / span) as u8
                }
            })
            .collect();
        Frame::new(
            Modality::IrVisualized,
            self.width,
            self.height,
            self.timestamp,
            PixelData::Gray8(gray),
        )
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: latest-value buffer
// ----------------------------------------------------------------------------

/// Counters describing how a slot has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub written: u64,
    /// Pending items discarded because a newer write arrived first.
    pub overwritten: u64,
    pub delivered: u64,
}

struct SlotState<T> {
    pending: VecDeque<T>,
    last_seen: Option<T>,
    stats: SlotStats,
}

/// Latest-value handoff between one producer and one consumer.
pub struct FrameSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T: Clone> FrameSlot<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOT_CAPACITY)
    }

    /// A slot holding up to `capacity` pending items (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(SlotState {
                pending: VecDeque::with_capacity(capacity),
                last_seen: None,
                stats: SlotStats::default(),
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an item. Never blocks; drops the oldest pending item when full.
    pub fn write(&self, item: T) {
        let mut state = self.lock();
        while state.pending.len() >= self.capacity {
            state.pending.pop_front();
            state.stats.overwritten += 1;
        }
        state.pending.push_back(item);
        state.stats.written += 1;
        drop(state);
        self.ready.notify_one();
    }

    /// Take the oldest pending item, waiting up to `timeout` for one to arrive.
    ///
    /// `None` or a zero timeout does not wait. When nothing arrives the last
    /// delivered item is returned again, or `None` if nothing was ever delivered.
    pub fn read(&self, timeout: Option<Duration>) -> Option<T> {
        self.read_versioned(timeout).map(|(_, item)| item)
    }

    /// Like `read`, paired with the delivery generation of the item.
    ///
    /// Every newly delivered item gets the next generation; a `lastSeen`
    /// fallback repeats the generation it was delivered with.
    pub fn read_versioned(&self, timeout: Option<Duration>) -> Option<(u64, T)> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
                state = match self
                    .ready
                    .wait_timeout_while(state, timeout, |s| s.pending.is_empty())
                {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }
        match state.pending.pop_front() {
            Some(item) => {
                state.last_seen = Some(item.clone());
                state.stats.delivered += 1;
                Some((state.stats.delivered, item))
            }
            None => {
                let generation = state.stats.delivered;
                state.last_seen.clone().map(|item| (generation, item))
            }
        }
    }

    /// Newest available item without consuming anything.
    pub fn peek_latest(&self) -> Option<T> {
        let state = self.lock();
        state
            .pending
            .back()
            .cloned()
            .or_else(|| state.last_seen.clone())
    }

    pub fn stats(&self) -> SlotStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        // A panicking holder cannot leave the queue half-updated, so keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
