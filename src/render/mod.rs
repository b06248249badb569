//! Render loop
//!
//! One call to [`render_frame`] per display frame: clear, draw the mirrored
//! camera image if the camera is ready, then the selected garment at its
//! placement. [`FramePacer`] decides when the next frame is due.

mod pacing;

use std::time::{Duration, Instant};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::camera::CameraFrame;
use crate::compositor::Canvas;
use crate::placement::{compute_placement, Placement, PlacementParams};
use crate::pose::PoseSnapshot;

pub use pacing::{FramePacer, Tick};

/// Render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Redraw rate
    pub target_fps: u32,
    /// Garment overlay opacity
    pub overlay_opacity: f32,
    /// Ignore poses older than this (never when unset)
    pub pose_stale_after_ms: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            overlay_opacity: 0.95,
            pose_stale_after_ms: None,
        }
    }
}

impl RenderConfig {
    pub fn pose_max_age(&self) -> Option<Duration> {
        self.pose_stale_after_ms.map(Duration::from_millis)
    }
}

/// Everything one frame is drawn from
pub struct FrameInputs<'a> {
    /// Camera has delivered its first frame
    pub camera_ready: bool,
    /// Most recent camera frame
    pub camera_frame: Option<&'a CameraFrame>,
    /// Selected garment image, present only once it has finished loading
    pub overlay: Option<&'a RgbaImage>,
    /// Most recent usable pose
    pub pose: Option<&'a PoseSnapshot>,
    pub params: &'a PlacementParams,
    pub opacity: f32,
}

/// What a frame ended up drawing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    /// Camera image was drawn
    pub background_drawn: bool,
    /// Garment placement, when an overlay was drawn
    pub placement: Option<Placement>,
}

/// Draw one frame onto `canvas`
pub fn render_frame(canvas: &mut Canvas, inputs: &FrameInputs<'_>) -> FrameReport {
    let mut report = FrameReport::default();
    canvas.clear();

    if inputs.camera_ready {
        if let Some(frame) = inputs.camera_frame {
            canvas.draw_mirrored(frame);
            report.background_drawn = true;
        }
    }

    if let Some(overlay) = inputs.overlay {
        let placement = compute_placement(canvas.size(), inputs.pose, inputs.params);
        canvas.draw_image(overlay, placement.rect, inputs.opacity);
        report.placement = Some(placement);
    }

    report
}

/// Frame counter with a once-per-second FPS estimate
#[derive(Debug, Clone)]
pub struct FrameStats {
    frame_count: u64,
    frames_since_update: u64,
    last_update: Instant,
    fps: f64,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            frames_since_update: 0,
            last_update: now,
            fps: 0.0,
        }
    }

    pub fn record_frame(&mut self, now: Instant) {
        self.frame_count += 1;
        self.frames_since_update += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_update = now;
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
