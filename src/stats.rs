//! Per-session detection statistics.
//!
//! `StatsAggregator` is written only by the pipeline thread. Readers go
//! through `SharedStats`, which takes the same lock for every write and every
//! read, so a snapshot never mixes one frame's histogram update with another
//! frame's FIFO push.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Capacity of the rolling per-frame detection count window.
pub const RECENT_COUNTS_CAPACITY: usize = 100;

/// FPS sampling window.
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time copy of the session counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_detections: u64,
    pub fps: u32,
    /// Oldest first, at most `RECENT_COUNTS_CAPACITY` entries.
    pub recent_counts: VecDeque<u32>,
    /// Cumulative per-label counts in first-seen order.
    pub label_histogram: Vec<(String, u64)>,
    #[serde(skip)]
    pub start_time: Option<SystemTime>,
    /// Time since `reset`, measured when the snapshot was taken.
    pub elapsed: Option<Duration>,
}

impl SessionStats {
    /// Detection count of the most recent frame.
    pub fn current_count(&self) -> u32 {
        self.recent_counts.back().copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    total_detections: u64,
    fps: u32,
    recent_counts: VecDeque<u32>,
    label_counts: HashMap<String, u64>,
    /// Labels in the order they were first recorded.
    label_order: Vec<String>,
    start_time: Option<SystemTime>,
    started_at: Option<Instant>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            recent_counts: VecDeque::with_capacity(RECENT_COUNTS_CAPACITY),
            ..Self::default()
        }
    }

    /// Zero all counters and start the session clock.
    pub fn reset(&mut self) {
        self.total_detections = 0;
        self.fps = 0;
        self.recent_counts.clear();
        self.label_counts.clear();
        self.label_order.clear();
        self.start_time = Some(SystemTime::now());
        self.started_at = Some(Instant::now());
    }

    /// Stop the session clock. Counters keep their final values.
    pub fn mark_stopped(&mut self) {
        self.started_at = None;
    }

    pub fn record_frame(&mut self, detection_count: u32, labels: &[String]) {
        self.total_detections += detection_count as u64;

        while self.recent_counts.len() >= RECENT_COUNTS_CAPACITY {
            self.recent_counts.pop_front();
        }
        self.recent_counts.push_back(detection_count);

        for label in labels {
            match self.label_counts.get_mut(label) {
                Some(count) => *count += 1,
                None => {
                    self.label_counts.insert(label.clone(), 1);
                    self.label_order.push(label.clone());
                }
            }
        }
    }

    /// Replace `fps` once a full window has elapsed since the last tick.
    ///
    /// Returns true when the value was replaced; the caller then starts a new
    /// window and resets its frame counter.
    pub fn tick_fps(
        &mut self,
        elapsed_since_last_tick: Duration,
        frames_since_last_tick: u32,
    ) -> bool {
        if elapsed_since_last_tick < FPS_WINDOW {
            return false;
        }
        self.fps = frames_since_last_tick;
        true
    }

    /// The `n` labels with the highest counts, descending. Ties keep first-seen order.
    pub fn top_n(&self, n: usize) -> Vec<(String, u64)> {
        let mut entries = self.histogram();
        // Stable sort over insertion order.
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(n);
        entries
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn current_count(&self) -> u32 {
        self.recent_counts.back().copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            total_detections: self.total_detections,
            fps: self.fps,
            recent_counts: self.recent_counts.clone(),
            label_histogram: self.histogram(),
            start_time: self.start_time,
            elapsed: self.started_at.map(|at| at.elapsed()),
        }
    }

    fn histogram(&self) -> Vec<(String, u64)> {
        self.label_order
            .iter()
            .map(|label| {
                let count = self.label_counts.get(label).copied().unwrap_or(0);
                (label.clone(), count)
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// FpsCounter: exact-second sampling window
// ----------------------------------------------------------------------------

/// Frames counted since the start of the current one-second window.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(window_start: Instant) -> Self {
        Self {
            window_start,
            frames: 0,
        }
    }

    /// Count one processed frame and tick the aggregator.
    pub fn frame_processed(&mut self, stats: &SharedStats, now: Instant) {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if stats.tick_fps(elapsed, self.frames) {
            self.window_start = now;
            self.frames = 0;
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// SharedStats: lock-guarded handle
// ----------------------------------------------------------------------------

/// Cloneable handle to the session aggregator.
#[derive(Clone, Debug, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<StatsAggregator>>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsAggregator::new())),
        }
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn mark_stopped(&self) {
        self.lock().mark_stopped();
    }

    pub fn record_frame(&self, detection_count: u32, labels: &[String]) {
        self.lock().record_frame(detection_count, labels);
    }

    pub fn tick_fps(&self, elapsed: Duration, frames: u32) -> bool {
        self.lock().tick_fps(elapsed, frames)
    }

    pub fn top_n(&self, n: usize) -> Vec<(String, u64)> {
        self.lock().top_n(n)
    }

    pub fn snapshot(&self) -> SessionStats {
        self.lock().snapshot()
    }

    // Counters stay consistent even if a holder panicked mid-update: every
    // mutation is a single call under this lock.
    fn lock(&self) -> MutexGuard<'_, StatsAggregator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `HH:MM:SS` session clock.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
