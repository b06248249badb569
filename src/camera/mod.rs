//! Camera capture module
//!
//! Provides cross-platform camera capture using the nokhwa crate.
//! Frames are captured on a background thread; the render thread reads the
//! most recent one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data, shared between the render and pose threads
    pub data: Arc<[u8]>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Capture timestamp
    pub timestamp: Instant,
}

impl CameraFrame {
    /// Wrap tightly packed RGBA pixels
    pub fn new(data: Vec<u8>, width: u32, height: u32, frame_number: u64) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            frame_number,
            timestamp: Instant::now(),
        }
    }

    /// Whether the buffer length matches the declared dimensions
    pub fn is_complete(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// Camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index (0 for default)
    pub index: u32,
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Requested capture rate
    pub target_fps: u32,
    /// How long to wait for the camera to open
    pub open_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            target_fps: 30,
            open_timeout_ms: 10_000,
        }
    }
}

/// Camera errors
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Failed to open camera {index}: {reason}")]
    Open { index: u32, reason: String },
    #[error("Failed to open camera stream: {0}")]
    Stream(String),
    #[error("Camera did not open within {0:?}")]
    Timeout(Duration),
    #[error("Capture thread exited before the camera opened")]
    Disconnected,
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Anything that supplies camera frames to the session
pub trait FrameSource: Send {
    /// Most recent frame, if any has been captured
    fn latest_frame(&self) -> Option<CameraFrame>;
    /// Stop producing frames
    fn stop(&mut self);
}

/// Opened camera reported back by the capture thread
struct OpenedCamera {
    name: String,
    width: u32,
    height: u32,
}

/// Camera capture interface
pub struct CameraCapture {
    /// Latest captured frame
    latest: Arc<Mutex<Option<CameraFrame>>>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl CameraCapture {
    /// Open a camera and start capturing
    ///
    /// Blocks until the capture thread reports that the stream is open, or
    /// that it failed to open.
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded(1);

        let thread_config = config.clone();
        let latest_clone = latest.clone();
        let running_clone = running.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    thread_config,
                    ready_sender,
                    latest_clone,
                    running_clone,
                );
            })?;

        let timeout = Duration::from_millis(config.open_timeout_ms);
        let opened = match ready_receiver.recv_timeout(timeout) {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {
                // Thread is still stuck inside the driver; let it finish on its own
                running.store(false, Ordering::Release);
                return Err(CameraError::Timeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread_handle.join();
                return Err(CameraError::Disconnected);
            }
        };

        log::info!(
            "Camera opened: {} ({}x{})",
            opened.name,
            opened.width,
            opened.height
        );

        Ok(Self {
            latest,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    /// Try the configured format first, then progressively looser requests
    fn open_camera(config: &CameraConfig) -> Result<Camera, CameraError> {
        let index = CameraIndex::Index(config.index);
        let resolution = Resolution::new(config.width, config.height);

        let attempts = [
            RequestedFormatType::Closest(CameraFormat::new(
                resolution,
                FrameFormat::MJPEG,
                config.target_fps,
            )),
            RequestedFormatType::HighestResolution(resolution),
            RequestedFormatType::None,
        ];

        let mut last_error = String::new();
        for requested in attempts {
            let description = format!("{:?}", requested);
            match Camera::new(index.clone(), RequestedFormat::new::<RgbAFormat>(requested)) {
                Ok(camera) => return Ok(camera),
                Err(e) => {
                    log::warn!("Camera format request {} failed: {:?}", description, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(CameraError::Open {
            index: config.index,
            reason: last_error,
        })
    }

    /// Camera capture thread
    fn capture_thread(
        config: CameraConfig,
        ready: Sender<Result<OpenedCamera, CameraError>>,
        latest: Arc<Mutex<Option<CameraFrame>>>,
        running: Arc<AtomicBool>,
    ) {
        log::info!("Starting camera capture thread (camera {})", config.index);

        let mut camera = match Self::open_camera(&config) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(CameraError::Stream(e.to_string())));
            return;
        }

        let opened = OpenedCamera {
            name: camera.info().human_name().to_string(),
            width: camera.resolution().width(),
            height: camera.resolution().height(),
        };
        if ready.send(Ok(opened)).is_err() {
            // Caller gave up waiting
            let _ = camera.stop_stream();
            return;
        }

        let mut frame_number = 0u64;
        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        frame_number += 1;
                        let camera_frame = CameraFrame::new(
                            image.into_raw(),
                            frame.resolution().width(),
                            frame.resolution().height(),
                            frame_number,
                        );
                        *latest.lock() = Some(camera_frame);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        let _ = camera.stop_stream();
        log::info!("Camera capture thread stopped");
    }
}

impl FrameSource for CameraCapture {
    fn latest_frame(&self) -> Option<CameraFrame> {
        self.latest.lock().clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        FrameSource::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_frame() {
        let frame = CameraFrame::new(vec![1, 2, 3, 4, 5, 6, 7, 8], 2, 1, 1);
        assert!(frame.is_complete());
    }

    #[test]
    fn test_incomplete_frame() {
        assert!(!CameraFrame::new(vec![0; 7], 2, 1, 1).is_complete());
        assert!(!CameraFrame::new(Vec::new(), 0, 0, 1).is_complete());
    }

    #[test]
    fn test_camera_config_defaults() {
        let config = CameraConfig::default();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.target_fps, 30);
    }
}
