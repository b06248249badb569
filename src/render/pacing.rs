//! Fixed-rate frame pacing

use std::time::{Duration, Instant};

/// What the event loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Pacer is stopped
    Idle,
    /// A frame is due now
    Redraw,
    /// Sleep until the given instant
    WaitUntil(Instant),
}

/// Schedules redraws at a fixed rate between `start` and `stop`
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_duration: Duration,
    next_frame_at: Option<Instant>,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        let target_fps = target_fps.max(1) as u64;
        Self {
            frame_duration: Duration::from_nanos(1_000_000_000 / target_fps),
            next_frame_at: None,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Begin scheduling; the first frame is due immediately
    pub fn start(&mut self, now: Instant) {
        if self.next_frame_at.is_none() {
            self.next_frame_at = Some(now);
        }
    }

    pub fn stop(&mut self) {
        self.next_frame_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_frame_at.is_some()
    }

    /// Advance the schedule
    ///
    /// Falling more than two frames behind resets the schedule instead of
    /// bursting to catch up.
    pub fn poll(&mut self, now: Instant) -> Tick {
        let Some(due) = self.next_frame_at else {
            return Tick::Idle;
        };
        if now < due {
            return Tick::WaitUntil(due);
        }

        let mut next = due + self.frame_duration;
        if now > next + self.frame_duration * 2 {
            next = now + self.frame_duration;
        }
        self.next_frame_at = Some(next);
        Tick::Redraw
    }
}
