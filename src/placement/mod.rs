//! Overlay placement
//!
//! Maps the canvas size and the latest pose onto the rectangle the garment is
//! drawn into. Without a usable pose the rectangle is a fixed fraction of the
//! canvas ("quick mode"), so an overlay is visible before the model warms up.

use serde::{Deserialize, Serialize};

use crate::pose::{Landmark, LandmarkIndex, PoseSnapshot};

/// Canvas dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f32,
    pub height: f32,
}

impl CanvasSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for CanvasSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width as f32, height as f32)
    }
}

/// Target rectangle in canvas pixels
///
/// Width or height may be negative when the landmarks are inverted (hip above
/// the shoulders); the compositor then draws the image flipped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PlacementRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle covers no area
    pub fn is_empty(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }
}

/// How a placement was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    /// Fixed canvas ratios
    Quick,
    /// Shoulder and hip landmarks
    Pose,
}

/// Placement result for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: PlacementRect,
    pub mode: PlacementMode,
}

/// Quick-mode canvas fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickModeRatios {
    pub x_ratio: f32,
    pub y_ratio: f32,
    pub width_ratio: f32,
    pub height_ratio: f32,
}

impl Default for QuickModeRatios {
    fn default() -> Self {
        Self {
            x_ratio: 0.2,
            y_ratio: 0.12,
            width_ratio: 0.6,
            height_ratio: 0.8,
        }
    }
}

/// Placement tuning constants
///
/// The pose-mode multipliers are empirical, not derived from body proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementParams {
    /// Fallback rectangle
    pub quick: QuickModeRatios,
    /// Overlay width as a multiple of the shoulder span
    pub width_scale: f32,
    /// Overlay height as a multiple of the shoulder-to-hip distance
    pub height_scale: f32,
    /// Lift of the overlay top above the shoulder line, as a fraction of the shoulder span
    pub top_offset: f32,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            quick: QuickModeRatios::default(),
            width_scale: 1.55,
            height_scale: 3.1,
            top_offset: 0.18,
        }
    }
}

/// The three landmarks placement is anchored on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoAnchors {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub hip: Landmark,
}

impl TorsoAnchors {
    /// Extract the anchors, or None if any is missing or not finite
    pub fn from_snapshot(snapshot: &PoseSnapshot) -> Option<Self> {
        let anchor = |index| snapshot.landmark(index).copied().filter(Landmark::is_finite);
        Some(Self {
            left_shoulder: anchor(LandmarkIndex::LeftShoulder)?,
            right_shoulder: anchor(LandmarkIndex::RightShoulder)?,
            hip: anchor(LandmarkIndex::RightHip)?,
        })
    }
}

/// Fixed-ratio rectangle
pub fn quick_rect(canvas: CanvasSize, params: &PlacementParams) -> PlacementRect {
    let ratios = &params.quick;
    PlacementRect::new(
        canvas.width * ratios.x_ratio,
        canvas.height * ratios.y_ratio,
        canvas.width * ratios.width_ratio,
        canvas.height * ratios.height_ratio,
    )
}

/// Rectangle anchored on the shoulders and hip
///
/// Landmark x is mirrored to match the mirrored camera image.
pub fn pose_rect(canvas: CanvasSize, anchors: &TorsoAnchors, params: &PlacementParams) -> PlacementRect {
    let lx = canvas.width - anchors.left_shoulder.x * canvas.width;
    let rx = canvas.width - anchors.right_shoulder.x * canvas.width;
    let shoulder_y = ((anchors.left_shoulder.y + anchors.right_shoulder.y) / 2.0) * canvas.height;
    let hip_y = anchors.hip.y * canvas.height;

    let body_width = (rx - lx).abs();
    let width = body_width * params.width_scale;
    let height = (hip_y - shoulder_y) * params.height_scale;

    PlacementRect::new(
        lx.min(rx) - (width - body_width) / 2.0,
        shoulder_y - body_width * params.top_offset,
        width,
        height,
    )
}

/// Placement for one frame, falling back to quick mode without usable pose data
pub fn compute_placement(
    canvas: CanvasSize,
    pose: Option<&PoseSnapshot>,
    params: &PlacementParams,
) -> Placement {
    match pose.and_then(TorsoAnchors::from_snapshot) {
        Some(anchors) => Placement {
            rect: pose_rect(canvas, &anchors, params),
            mode: PlacementMode::Pose,
        },
        None => Placement {
            rect: quick_rect(canvas, params),
            mode: PlacementMode::Quick,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::LANDMARK_COUNT;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn snapshot(left: (f32, f32), right: (f32, f32), hip: (f32, f32)) -> PoseSnapshot {
        let mut landmarks = vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT];
        landmarks[LandmarkIndex::LeftShoulder.index()] = Landmark::new(left.0, left.1);
        landmarks[LandmarkIndex::RightShoulder.index()] = Landmark::new(right.0, right.1);
        landmarks[LandmarkIndex::RightHip.index()] = Landmark::new(hip.0, hip.1);
        PoseSnapshot::new(landmarks, 1.0, 0)
    }

    #[test]
    fn test_quick_rect_ratios() {
        let rect = quick_rect(CanvasSize::new(640.0, 480.0), &PlacementParams::default());
        assert_close(rect.x, 128.0);
        assert_close(rect.y, 57.6);
        assert_close(rect.width, 384.0);
        assert_close(rect.height, 384.0);
    }

    #[test]
    fn test_quick_rect_scales_with_canvas() {
        let params = PlacementParams::default();
        for (w, h) in [(1.0, 1.0), (1280.0, 720.0), (1920.0, 1080.0)] {
            let rect = quick_rect(CanvasSize::new(w, h), &params);
            assert_close(rect.x, w * 0.2);
            assert_close(rect.y, h * 0.12);
            assert_close(rect.width, w * 0.6);
            assert_close(rect.height, h * 0.8);
        }
    }

    #[test]
    fn test_pose_rect_formula() {
        let pose = snapshot((0.3, 0.4), (0.7, 0.4), (0.5, 0.8));
        let placement = compute_placement(
            CanvasSize::new(640.0, 480.0),
            Some(&pose),
            &PlacementParams::default(),
        );

        assert_eq!(placement.mode, PlacementMode::Pose);
        // lx = 448, rx = 192, body width = 256, shoulder y = 192, hip y = 384
        assert_close(placement.rect.width, 396.8);
        assert_close(placement.rect.height, 595.2);
        assert_close(placement.rect.x, 121.6);
        assert_close(placement.rect.y, 145.92);
    }

    #[test]
    fn test_pose_rect_uses_params() {
        let pose = snapshot((0.3, 0.4), (0.7, 0.4), (0.5, 0.8));
        let params = PlacementParams {
            width_scale: 1.0,
            height_scale: 1.0,
            top_offset: 0.0,
            ..Default::default()
        };
        let rect = pose_rect(
            CanvasSize::new(640.0, 480.0),
            &TorsoAnchors::from_snapshot(&pose).unwrap(),
            &params,
        );
        assert_close(rect.x, 192.0);
        assert_close(rect.y, 192.0);
        assert_close(rect.width, 256.0);
        assert_close(rect.height, 192.0);
    }

    #[test]
    fn test_inverted_torso_keeps_sign() {
        let pose = snapshot((0.3, 0.8), (0.7, 0.8), (0.5, 0.4));
        let placement = compute_placement(
            CanvasSize::new(640.0, 480.0),
            Some(&pose),
            &PlacementParams::default(),
        );
        assert_eq!(placement.mode, PlacementMode::Pose);
        assert!(placement.rect.height < 0.0);
    }

    #[test]
    fn test_fallback_without_pose() {
        let canvas = CanvasSize::new(640.0, 480.0);
        let params = PlacementParams::default();

        let placement = compute_placement(canvas, None, &params);
        assert_eq!(placement.mode, PlacementMode::Quick);
        assert_eq!(placement.rect, quick_rect(canvas, &params));

        let empty = PoseSnapshot::empty(1);
        assert_eq!(compute_placement(canvas, Some(&empty), &params).mode, PlacementMode::Quick);
    }

    #[test]
    fn test_fallback_on_partial_pose() {
        let canvas = CanvasSize::new(640.0, 480.0);
        let params = PlacementParams::default();

        // Landmark list stops before the hip
        let partial = PoseSnapshot::new(vec![Landmark::new(0.5, 0.5); 13], 1.0, 1);
        assert_eq!(compute_placement(canvas, Some(&partial), &params).mode, PlacementMode::Quick);

        let nan = snapshot((f32::NAN, 0.4), (0.7, 0.4), (0.5, 0.8));
        assert_eq!(compute_placement(canvas, Some(&nan), &params).mode, PlacementMode::Quick);
    }
}
