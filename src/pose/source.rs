//! Landmark source adapter
//!
//! Runs the pose model on a worker thread. Camera frames are offered without
//! blocking; while the worker is busy, new frames are dropped. Every completed
//! detection overwrites the [`LatestPose`] slot read by the render loop.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use super::{
    LandmarkSmoother, LatestPose, OneEuroFilter, PoseDetection, PoseError, PoseModel,
    PoseOptions, PoseSnapshot,
};
use crate::camera::CameraFrame;

/// Lifecycle of the pose worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceStatus {
    /// Model is being loaded
    Loading,
    /// Model loaded, frames are being processed
    Ready,
    /// Model could not be loaded
    Failed(String),
    /// Worker has exited
    Stopped,
}

/// Pose worker handle
pub struct LandmarkSource {
    /// Channel to send frames to the worker
    frame_sender: Option<Sender<CameraFrame>>,
    /// Worker lifecycle
    status: Arc<Mutex<SourceStatus>>,
    /// Worker thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Last frame number handed to the worker
    last_submitted: Option<u64>,
    /// Frames rejected because the worker was busy
    dropped_frames: u64,
}

impl LandmarkSource {
    /// Start the worker; `load_model` runs on the worker thread
    pub fn spawn<F>(load_model: F, options: PoseOptions, latest: LatestPose) -> Result<Self, PoseError>
    where
        F: FnOnce(&PoseOptions) -> Result<Box<dyn PoseModel>, PoseError> + Send + 'static,
    {
        let status = Arc::new(Mutex::new(SourceStatus::Loading));
        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<CameraFrame>(1);

        let status_clone = status.clone();
        let thread_handle = std::thread::Builder::new()
            .name("pose-landmarks".to_string())
            .spawn(move || {
                Self::worker_thread(load_model, options, frame_receiver, latest, status_clone);
            })?;

        Ok(Self {
            frame_sender: Some(frame_sender),
            status,
            thread_handle: Some(thread_handle),
            last_submitted: None,
            dropped_frames: 0,
        })
    }

    fn worker_thread<F>(
        load_model: F,
        options: PoseOptions,
        frame_receiver: Receiver<CameraFrame>,
        latest: LatestPose,
        status: Arc<Mutex<SourceStatus>>,
    ) where
        F: FnOnce(&PoseOptions) -> Result<Box<dyn PoseModel>, PoseError>,
    {
        log::info!("Pose worker started, loading model...");

        let mut model = match load_model(&options) {
            Ok(model) => {
                *status.lock() = SourceStatus::Ready;
                log::info!("Pose model ready");
                model
            }
            Err(e) => {
                log::warn!("Failed to load pose model: {}. Using quick placement only.", e);
                *status.lock() = SourceStatus::Failed(e.to_string());
                return;
            }
        };

        let mut gate = DetectionGate::new(&options);

        while let Ok(frame) = frame_receiver.recv() {
            run_detection(model.as_mut(), &mut gate, &frame, &latest);
        }

        *status.lock() = SourceStatus::Stopped;
        log::info!("Pose worker stopped");
    }

    /// Offer a frame to the worker without blocking
    ///
    /// Returns true if the frame was accepted. Frames already submitted are
    /// ignored, and frames arriving while the worker is busy are dropped.
    pub fn submit(&mut self, frame: &CameraFrame) -> bool {
        if self.last_submitted == Some(frame.frame_number) {
            return false;
        }
        let Some(sender) = &self.frame_sender else {
            return false;
        };

        match sender.try_send(frame.clone()) {
            Ok(()) => {
                self.last_submitted = Some(frame.frame_number);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Current worker lifecycle
    pub fn status(&self) -> SourceStatus {
        self.status.lock().clone()
    }

    /// Frames rejected because the worker was busy
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Stop the worker thread
    pub fn stop(&mut self) {
        // Dropping the sender ends the worker's receive loop
        self.frame_sender = None;

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LandmarkSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Detect on one frame and publish the gated result
///
/// Losing the person also drops the model's tracked region. A failed
/// detection publishes nothing.
fn run_detection(
    model: &mut dyn PoseModel,
    gate: &mut DetectionGate,
    frame: &CameraFrame,
    latest: &LatestPose,
) {
    match model.detect(frame) {
        Ok(detection) => {
            let snapshot = gate.accept(detection, frame.frame_number, frame.timestamp);
            if !snapshot.has_pose() {
                model.reset_tracking();
            }
            latest.publish(snapshot);
        }
        Err(e) => {
            log::warn!("Pose detection failed on frame {}: {}", frame.frame_number, e);
        }
    }
}

/// Applies confidence thresholds and smoothing to raw detections
struct DetectionGate {
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    smoother: Option<LandmarkSmoother>,
    tracking: bool,
    last_timestamp: Option<Instant>,
}

impl DetectionGate {
    fn new(options: &PoseOptions) -> Self {
        Self {
            min_detection_confidence: options.min_detection_confidence,
            min_tracking_confidence: options.min_tracking_confidence,
            smoother: options
                .smooth_landmarks
                .then(|| LandmarkSmoother::new(OneEuroFilter::default())),
            tracking: false,
            last_timestamp: None,
        }
    }

    fn accept(
        &mut self,
        detection: Option<PoseDetection>,
        frame_number: u64,
        timestamp: Instant,
    ) -> PoseSnapshot {
        let threshold = if self.tracking {
            self.min_tracking_confidence
        } else {
            self.min_detection_confidence
        };

        let detection = detection.filter(|d| d.score >= threshold && !d.landmarks.is_empty());
        let Some(detection) = detection else {
            self.tracking = false;
            self.last_timestamp = None;
            if let Some(smoother) = &mut self.smoother {
                smoother.reset();
            }
            return PoseSnapshot::empty(frame_number);
        };

        let elapsed = self
            .last_timestamp
            .map(|prev| timestamp.saturating_duration_since(prev).as_secs_f32())
            .unwrap_or(0.0);
        self.last_timestamp = Some(timestamp);
        self.tracking = true;

        let landmarks = match &mut self.smoother {
            Some(smoother) => smoother.smooth(&detection.landmarks, elapsed),
            None => detection.landmarks,
        };

        PoseSnapshot::new(landmarks, detection.score, frame_number)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pose::{Landmark, LANDMARK_COUNT};

    struct FixedModel {
        score: f32,
    }

    impl PoseModel for FixedModel {
        fn detect(&mut self, _frame: &CameraFrame) -> Result<Option<PoseDetection>, PoseError> {
            Ok(Some(PoseDetection {
                landmarks: vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT],
                score: self.score,
            }))
        }
    }

    fn options(smooth: bool) -> PoseOptions {
        PoseOptions {
            smooth_landmarks: smooth,
            min_detection_confidence: 0.6,
            min_tracking_confidence: 0.3,
            ..Default::default()
        }
    }

    fn detection(x: f32, score: f32) -> Option<PoseDetection> {
        Some(PoseDetection {
            landmarks: vec![Landmark::new(x, 0.5); LANDMARK_COUNT],
            score,
        })
    }

    fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(value) = check() {
                return Some(value);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_gate_detection_then_tracking_threshold() {
        let mut gate = DetectionGate::new(&options(false));
        let now = Instant::now();

        // Below detection threshold: nobody
        assert!(!gate.accept(detection(0.5, 0.5), 1, now).has_pose());
        // Above detection threshold: tracked
        assert!(gate.accept(detection(0.5, 0.7), 2, now).has_pose());
        // Tracking threshold is lower, so 0.5 keeps the person
        assert!(gate.accept(detection(0.5, 0.5), 3, now).has_pose());
        // Lost below tracking threshold
        assert!(!gate.accept(detection(0.5, 0.2), 4, now).has_pose());
        // Back to the detection threshold
        assert!(!gate.accept(detection(0.5, 0.5), 5, now).has_pose());
    }

    #[test]
    fn test_gate_no_person() {
        let mut gate = DetectionGate::new(&options(true));
        let snapshot = gate.accept(None, 7, Instant::now());
        assert!(!snapshot.has_pose());
        assert_eq!(snapshot.frame_number, 7);
    }

    #[test]
    fn test_gate_smooths_tracked_landmarks() {
        let mut gate = DetectionGate::new(&options(true));
        let start = Instant::now();
        gate.accept(detection(0.2, 0.9), 1, start);
        let snapshot = gate.accept(detection(0.8, 0.9), 2, start + Duration::from_millis(33));
        let x = snapshot.landmarks[0].x;
        assert!(x > 0.2 && x <= 0.8);
    }

    #[test]
    fn test_gate_recovers_after_non_finite_landmark() {
        let mut gate = DetectionGate::new(&options(true));
        let start = Instant::now();
        gate.accept(detection(0.3, 0.9), 1, start);

        let glitch = gate.accept(detection(f32::NAN, 0.9), 2, start + Duration::from_millis(33));
        assert!(glitch.has_pose());

        let mut snapshot = glitch;
        for n in 3..10 {
            snapshot = gate.accept(detection(0.3, 0.9), n, start + Duration::from_millis(33 * n));
        }
        assert!(snapshot.landmarks.iter().all(|lm| lm.is_finite()));
        assert!((snapshot.landmarks[0].x - 0.3).abs() < 1e-4);
    }

    /// Model with a scripted score sequence that counts tracking resets
    struct ScriptedModel {
        scores: Vec<f32>,
        resets: usize,
    }

    impl PoseModel for ScriptedModel {
        fn detect(&mut self, _frame: &CameraFrame) -> Result<Option<PoseDetection>, PoseError> {
            if self.scores.is_empty() {
                return Err(PoseError::Output("no more frames".into()));
            }
            let score = self.scores.remove(0);
            Ok(detection(0.5, score))
        }

        fn reset_tracking(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn test_losing_person_resets_model_tracking() {
        let mut model = ScriptedModel {
            scores: vec![0.9, 0.4, 0.2, 0.9],
            resets: 0,
        };
        let mut gate = DetectionGate::new(&options(false));
        let latest = LatestPose::new();

        let mut run = |n: u64, model: &mut ScriptedModel| {
            let frame = CameraFrame::new(vec![0; 16], 2, 2, n);
            run_detection(model, &mut gate, &frame, &latest);
            latest.latest()
        };

        // Tracked, then kept above the tracking threshold
        assert!(run(1, &mut model).unwrap().has_pose());
        assert!(run(2, &mut model).unwrap().has_pose());
        assert_eq!(model.resets, 0);

        // Below the tracking threshold: lost, model searches the full frame again
        assert!(!run(3, &mut model).unwrap().has_pose());
        assert_eq!(model.resets, 1);

        assert!(run(4, &mut model).unwrap().has_pose());

        // Failed detection keeps the previous pose and tracking state
        assert_eq!(run(5, &mut model).unwrap().frame_number, 4);
        assert_eq!(model.resets, 1);
    }

    #[test]
    fn test_source_publishes_latest_pose() {
        let latest = LatestPose::new();
        let mut source = LandmarkSource::spawn(
            |_| Ok(Box::new(FixedModel { score: 0.9 }) as Box<dyn PoseModel>),
            options(false),
            latest.clone(),
        )
        .unwrap();

        let frame = CameraFrame::new(vec![0; 4 * 4 * 4], 4, 4, 42);
        let snapshot = wait_for(|| {
            source.submit(&frame);
            latest.latest()
        })
        .expect("pose was never published");

        assert_eq!(snapshot.frame_number, 42);
        assert!(snapshot.has_pose());
        assert_eq!(source.status(), SourceStatus::Ready);

        source.stop();
        assert_eq!(source.status(), SourceStatus::Stopped);
    }

    #[test]
    fn test_source_ignores_resubmitted_frame() {
        let latest = LatestPose::new();
        let mut source = LandmarkSource::spawn(
            |_| Ok(Box::new(FixedModel { score: 0.9 }) as Box<dyn PoseModel>),
            options(false),
            latest,
        )
        .unwrap();

        let frame = CameraFrame::new(vec![0; 16], 2, 2, 1);
        assert!(source.submit(&frame));
        assert!(!source.submit(&frame));
    }

    #[test]
    fn test_source_reports_load_failure() {
        let latest = LatestPose::new();
        let source = LandmarkSource::spawn(
            |_| Err(PoseError::ModelDirNotFound),
            options(false),
            latest.clone(),
        )
        .unwrap();

        let status = wait_for(|| match source.status() {
            SourceStatus::Loading => None,
            other => Some(other),
        });
        assert!(matches!(status, Some(SourceStatus::Failed(_))));
        assert!(latest.latest().is_none());
    }
}
