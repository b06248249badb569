//! BlazePose landmark network on ONNX Runtime

use std::path::PathBuf;

use ndarray::Array4;

use super::roi::{to_nhwc, SquareRoi};
use super::{Landmark, PoseDetection, PoseError, PoseModel, PoseOptions, LANDMARK_COUNT};
use crate::camera::CameraFrame;

/// Square input resolution of the landmark network
const INPUT_SIZE: u32 = 256;

/// Values per landmark in the network output (x, y, z, visibility, presence)
const LANDMARK_STRIDE: usize = 5;

/// Landmarks in the network output: 33 body points and 6 auxiliary ones
const RAW_LANDMARK_COUNT: usize = 39;

/// Output positions: screen landmarks, then the pose flag
const LANDMARKS_OUTPUT: usize = 0;
const POSE_FLAG_OUTPUT: usize = 1;

/// Padding around the landmark bounding square, relative to its edge
const ROI_PADDING: f32 = 0.3;

/// Pose landmark network loaded into an ONNX Runtime session
///
/// Tracks the person between frames: each detection seeds the crop used for
/// the next one, and [`PoseModel::reset_tracking`] falls back to the whole frame.
pub struct OnnxPoseModel {
    session: ort::session::Session,
    roi: Option<SquareRoi>,
}

impl OnnxPoseModel {
    /// Load the landmark network selected by `options`
    pub fn load(options: &PoseOptions) -> Result<Self, PoseError> {
        options.validate()?;

        let model_dir = match &options.model_dir {
            Some(dir) => dir.clone(),
            None => find_model_dir()?,
        };
        log::info!("Model directory: {:?}", model_dir);

        let model_path = model_dir.join(options.model_file_name());
        if !model_path.exists() {
            return Err(PoseError::ModelNotFound(model_path));
        }

        ort::init()
            .with_name("VirtualTryOn")
            .commit()
            .map_err(|e| PoseError::Runtime(format!("Failed to initialize ORT: {}", e)))?;

        let session = ort::session::Session::builder()
            .map_err(|e| PoseError::Runtime(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| PoseError::Runtime(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| PoseError::Runtime(format!("Failed to load pose model: {}", e)))?;

        if session.outputs.len() <= POSE_FLAG_OUTPUT {
            return Err(PoseError::Output(format!(
                "{:?} has {} outputs, expected landmarks and pose flag",
                model_path,
                session.outputs.len()
            )));
        }

        log::info!("Loaded pose model from {:?}", model_path);

        Ok(Self { session, roi: None })
    }
}

impl PoseModel for OnnxPoseModel {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<PoseDetection>, PoseError> {
        let roi = self
            .roi
            .unwrap_or_else(|| SquareRoi::full_frame(frame.width, frame.height));

        let input = to_nhwc(&roi.crop(frame, INPUT_SIZE));
        let input_array = Array4::from_shape_vec(
            (1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3),
            input,
        )
        .map_err(|e| PoseError::Runtime(format!("Failed to create input array: {}", e)))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| PoseError::Runtime(format!("Failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| PoseError::Runtime(format!("Inference failed: {}", e)))?;

        let (_, raw_landmarks) = outputs[LANDMARKS_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| PoseError::Output(format!("landmarks: {}", e)))?;
        let (_, pose_flag) = outputs[POSE_FLAG_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| PoseError::Output(format!("pose flag: {}", e)))?;

        let (landmarks, score) = parse_outputs(raw_landmarks, pose_flag)?;
        let landmarks: Vec<Landmark> = landmarks
            .into_iter()
            .map(|lm| roi.to_frame(lm, frame.width, frame.height))
            .collect();

        self.roi = SquareRoi::around(&landmarks, frame.width, frame.height, ROI_PADDING);

        Ok(Some(PoseDetection { landmarks, score }))
    }

    fn reset_tracking(&mut self) {
        if self.roi.take().is_some() {
            log::debug!("Pose tracking lost, searching the full frame");
        }
    }
}

/// Find the models directory next to the executable or the working directory
fn find_model_dir() -> Result<PathBuf, PoseError> {
    if let Ok(exe_path) = std::env::current_exe() {
        // Walk up from target/{debug,release} towards the crate root
        for dir in exe_path.ancestors().skip(1).take(3) {
            let model_dir = dir.join("models");
            if model_dir.is_dir() {
                return Ok(model_dir);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let model_dir = cwd.join("models");
        if model_dir.is_dir() {
            return Ok(model_dir);
        }
    }

    Err(PoseError::ModelDirNotFound)
}

/// Split the landmark and pose flag tensors into normalized landmarks and a presence score
pub(crate) fn parse_outputs(
    raw_landmarks: &[f32],
    pose_flag: &[f32],
) -> Result<(Vec<Landmark>, f32), PoseError> {
    if raw_landmarks.len() != RAW_LANDMARK_COUNT * LANDMARK_STRIDE {
        return Err(PoseError::Output(format!(
            "expected {} landmark values, got {}",
            RAW_LANDMARK_COUNT * LANDMARK_STRIDE,
            raw_landmarks.len()
        )));
    }
    let [flag] = pose_flag else {
        return Err(PoseError::Output(format!(
            "expected a single pose flag, got {} values",
            pose_flag.len()
        )));
    };

    Ok((
        decode_landmarks(raw_landmarks, INPUT_SIZE as f32),
        presence_score(*flag),
    ))
}

/// Convert raw network output (pixels of the input image) to normalized landmarks
pub(crate) fn decode_landmarks(raw: &[f32], input_size: f32) -> Vec<Landmark> {
    raw.chunks_exact(LANDMARK_STRIDE)
        .take(LANDMARK_COUNT)
        .map(|values| Landmark {
            x: values[0] / input_size,
            y: values[1] / input_size,
            z: values[2] / input_size,
            visibility: sigmoid(values[3]),
        })
        .collect()
}

/// The pose flag is a probability on some exports and a logit on others
fn presence_score(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        sigmoid(raw)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
