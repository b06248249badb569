//! Pose landmark module
//!
//! Body landmark types, the single-slot "latest pose" cell shared between the
//! pose worker and the render loop, and the [`PoseModel`] seam behind which
//! the landmark network lives.

mod onnx;
mod roi;
mod smoothing;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::CameraFrame;

pub use onnx::OnnxPoseModel;
pub use smoothing::{LandmarkSmoother, OneEuroFilter};
pub use source::{LandmarkSource, SourceStatus};

/// Number of body landmarks produced per pose
pub const LANDMARK_COUNT: usize = 33;

/// Body landmark in normalized frame coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    /// Horizontal position (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Vertical position (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
    /// Relative depth, same scale as `x`
    pub z: f32,
    /// Visibility score in [0, 1]
    pub visibility: f32,
}

impl Landmark {
    /// Create a fully visible landmark at `(x, y)`
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: 1.0,
        }
    }

    /// Whether both image-plane coordinates are finite numbers
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// BlazePose body keypoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIndex {
    /// Position of this keypoint in a landmark list
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Raw output of a [`PoseModel`] for one frame
#[derive(Clone, Debug, Default)]
pub struct PoseDetection {
    /// Landmarks in [`LandmarkIndex`] order
    pub landmarks: Vec<Landmark>,
    /// Pose presence score in [0, 1]
    pub score: f32,
}

/// Latest pose published by the landmark source
#[derive(Clone, Debug)]
pub struct PoseSnapshot {
    /// Landmarks in [`LandmarkIndex`] order; empty when no person was found
    pub landmarks: Vec<Landmark>,
    /// Presence score of the detection
    pub score: f32,
    /// Camera frame the detection ran on
    pub frame_number: u64,
    /// When the detection completed
    pub detected_at: Instant,
}

impl PoseSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(landmarks: Vec<Landmark>, score: f32, frame_number: u64) -> Self {
        Self {
            landmarks,
            score,
            frame_number,
            detected_at: Instant::now(),
        }
    }

    /// Snapshot for a frame where the model found nobody
    pub fn empty(frame_number: u64) -> Self {
        Self::new(Vec::new(), 0.0, frame_number)
    }

    /// Whether the snapshot carries any landmarks
    pub fn has_pose(&self) -> bool {
        !self.landmarks.is_empty()
    }

    /// Look up a single keypoint
    pub fn landmark(&self, index: LandmarkIndex) -> Option<&Landmark> {
        self.landmarks.get(index.index())
    }

    /// Time elapsed since the detection completed
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.detected_at)
    }

    /// Whether the snapshot is older than `max_age` (never stale without a limit)
    pub fn is_stale(&self, now: Instant, max_age: Option<Duration>) -> bool {
        match max_age {
            Some(limit) => self.age(now) > limit,
            None => false,
        }
    }
}

/// Single-slot cell holding the most recent pose
///
/// Every completed detection overwrites the slot; readers always see the most
/// recent value. There is no queue and no history.
#[derive(Clone, Default)]
pub struct LatestPose {
    slot: Arc<Mutex<Option<PoseSnapshot>>>,
}

impl LatestPose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current pose
    pub fn publish(&self, snapshot: PoseSnapshot) {
        *self.slot.lock() = Some(snapshot);
    }

    /// Copy of the current pose, if any detection has completed
    pub fn latest(&self) -> Option<PoseSnapshot> {
        self.slot.lock().clone()
    }
}

/// Pose model options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseOptions {
    /// 0 = lite, 1 = full, 2 = heavy landmark network
    pub model_complexity: u8,
    /// Apply temporal smoothing to the landmark stream
    pub smooth_landmarks: bool,
    /// Minimum presence score to start tracking a person
    pub min_detection_confidence: f32,
    /// Minimum presence score to keep tracking a person
    pub min_tracking_confidence: f32,
    /// Directory holding the ONNX models (searched for when unset)
    pub model_dir: Option<PathBuf>,
}

impl Default for PoseOptions {
    fn default() -> Self {
        Self {
            model_complexity: 0,
            smooth_landmarks: true,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            model_dir: None,
        }
    }
}

impl PoseOptions {
    /// File name of the landmark network for the configured complexity
    pub fn model_file_name(&self) -> &'static str {
        match self.model_complexity {
            0 => "pose_landmark_lite.onnx",
            1 => "pose_landmark_full.onnx",
            _ => "pose_landmark_heavy.onnx",
        }
    }

    /// Check option ranges
    pub fn validate(&self) -> Result<(), PoseError> {
        if self.model_complexity > 2 {
            return Err(PoseError::InvalidOptions(format!(
                "model_complexity must be 0, 1 or 2 (got {})",
                self.model_complexity
            )));
        }
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoseError::InvalidOptions(format!(
                    "{} must be within [0, 1] (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Pose model and landmark source errors
#[derive(Debug, Error)]
pub enum PoseError {
    #[error("Models directory not found. Create a 'models' directory with ONNX models.")]
    ModelDirNotFound,
    #[error("Pose model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("ONNX Runtime error: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("Invalid pose options: {0}")]
    InvalidOptions(String),
    #[error("Failed to spawn pose worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A landmark network
///
/// `Ok(None)` means the model ran and found no person. `Err` means detection
/// failed for this frame; the landmark source then publishes nothing.
pub trait PoseModel: Send {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<PoseDetection>, PoseError>;

    /// Forget the tracked person; the next detection searches the whole frame
    fn reset_tracking(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_index_positions() {
        assert_eq!(LandmarkIndex::LeftShoulder.index(), 11);
        assert_eq!(LandmarkIndex::RightShoulder.index(), 12);
        assert_eq!(LandmarkIndex::RightHip.index(), 24);
        assert_eq!(LandmarkIndex::RightFootIndex.index(), LANDMARK_COUNT - 1);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = PoseSnapshot::new(vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT], 0.9, 3);
        assert!(snapshot.has_pose());
        assert_eq!(snapshot.landmark(LandmarkIndex::Nose), Some(&Landmark::new(0.5, 0.5)));

        let empty = PoseSnapshot::empty(4);
        assert!(!empty.has_pose());
        assert!(empty.landmark(LandmarkIndex::LeftShoulder).is_none());
    }

    #[test]
    fn test_snapshot_staleness() {
        let snapshot = PoseSnapshot::empty(0);
        let later = snapshot.detected_at + Duration::from_millis(500);
        assert!(!snapshot.is_stale(later, None));
        assert!(!snapshot.is_stale(later, Some(Duration::from_secs(1))));
        assert!(snapshot.is_stale(later, Some(Duration::from_millis(100))));
    }

    #[test]
    fn test_latest_pose_overwrites() {
        let latest = LatestPose::new();
        assert!(latest.latest().is_none());

        let reader = latest.clone();
        latest.publish(PoseSnapshot::empty(1));
        latest.publish(PoseSnapshot::empty(2));
        assert_eq!(reader.latest().map(|p| p.frame_number), Some(2));
    }

    #[test]
    fn test_pose_options_defaults() {
        let options = PoseOptions::default();
        assert_eq!(options.model_complexity, 0);
        assert!(options.smooth_landmarks);
        assert_eq!(options.min_detection_confidence, 0.5);
        assert_eq!(options.min_tracking_confidence, 0.5);
        assert_eq!(options.model_file_name(), "pose_landmark_lite.onnx");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_pose_options_validation() {
        let options = PoseOptions {
            model_complexity: 3,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = PoseOptions {
            min_tracking_confidence: 1.5,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
