//! Try-on session
//!
//! Owns everything the window needs per frame: the garment catalog and its
//! image loader, the camera, the pose worker, the canvas and the frame pacer.
//! Startup order is catalog, camera, render loop, then the pose model; a
//! camera failure stops the sequence before the render loop starts.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::camera::{CameraCapture, CameraConfig, CameraError, CameraFrame, FrameSource};
use crate::catalog::{AssetError, CatalogError, Garment, GarmentCatalog, GarmentImageLoader};
use crate::compositor::Canvas;
use crate::config::TryOnConfig;
use crate::pose::{
    LandmarkSource, LatestPose, OnnxPoseModel, PoseError, PoseModel, PoseOptions, SourceStatus,
};
use crate::render::{self, FrameInputs, FramePacer, FrameReport, FrameStats, Tick};

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Pose(#[from] PoseError),
}

/// Status line shown over the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusMessage {
    /// Nothing to show
    #[default]
    None,
    /// Pose model still loading
    LoadingModel,
    /// Camera could not be opened
    CameraFailed,
    /// Pose model failed to load, placement stays in quick mode
    ModelUnavailable,
}

impl StatusMessage {
    pub fn text(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::LoadingModel => Some("Loading AI model..."),
            Self::CameraFailed => Some("Camera access failed!"),
            Self::ModelUnavailable => Some("Pose model unavailable, using quick placement"),
        }
    }
}

/// State shared by the UI and the render step
pub struct AppState {
    /// Garments and the current selection
    pub catalog: GarmentCatalog,
    /// Camera has delivered its first frame
    pub camera_ready: bool,
    /// Most recent pose, written by the pose worker
    pub latest_pose: LatestPose,
    /// Status line
    pub status: StatusMessage,
}

/// A running (or not yet started) try-on session
pub struct TryOnSession {
    config: TryOnConfig,
    state: AppState,
    loader: GarmentImageLoader,
    camera: Option<Box<dyn FrameSource>>,
    landmarks: Option<LandmarkSource>,
    canvas: Canvas,
    pacer: FramePacer,
    stats: FrameStats,
    current_frame: Option<CameraFrame>,
    last_report: FrameReport,
}

impl TryOnSession {
    /// Build the catalog and request the image of the initially selected garment
    pub fn new(config: TryOnConfig) -> Result<Self, SessionError> {
        let catalog = GarmentCatalog::from_config(&config.catalog)?;
        let mut loader = GarmentImageLoader::spawn()?;
        if let Some(garment) = catalog.selected() {
            loader.request(&garment.image);
        }
        log::info!("Catalog ready with {} garments", catalog.len());

        let canvas = Canvas::new(config.camera.width, config.camera.height);
        let pacer = FramePacer::new(config.render.target_fps);

        Ok(Self {
            config,
            state: AppState {
                catalog,
                camera_ready: false,
                latest_pose: LatestPose::new(),
                status: StatusMessage::None,
            },
            loader,
            camera: None,
            landmarks: None,
            canvas,
            pacer,
            stats: FrameStats::new(Instant::now()),
            current_frame: None,
            last_report: FrameReport::default(),
        })
    }

    /// Open the camera, start the render loop, then start loading the pose model
    ///
    /// On camera failure the status shows the failure, the error is returned,
    /// and neither the render loop nor the pose worker is started.
    pub fn start<C, M>(&mut self, open_camera: C, load_model: M, now: Instant) -> Result<(), SessionError>
    where
        C: FnOnce(&CameraConfig) -> Result<Box<dyn FrameSource>, CameraError>,
        M: FnOnce(&PoseOptions) -> Result<Box<dyn PoseModel>, PoseError> + Send + 'static,
    {
        let camera = match open_camera(&self.config.camera) {
            Ok(camera) => camera,
            Err(e) => {
                log::error!("Camera Error: {}", e);
                self.state.status = StatusMessage::CameraFailed;
                return Err(e.into());
            }
        };
        self.camera = Some(camera);

        self.pacer.start(now);
        self.stats = FrameStats::new(now);
        log::info!("Render loop started at {} fps", self.config.render.target_fps);

        self.state.status = StatusMessage::LoadingModel;
        match LandmarkSource::spawn(
            load_model,
            self.config.pose.clone(),
            self.state.latest_pose.clone(),
        ) {
            Ok(source) => self.landmarks = Some(source),
            Err(e) => {
                log::warn!("Failed to start pose worker: {}. Using quick placement only.", e);
                self.state.status = StatusMessage::ModelUnavailable;
            }
        }
        Ok(())
    }

    /// Start with the system camera and the ONNX landmark model
    pub fn start_default(&mut self, now: Instant) -> Result<(), SessionError> {
        self.start(
            |config| CameraCapture::open(config).map(|c| Box::new(c) as Box<dyn FrameSource>),
            |options| OnnxPoseModel::load(options).map(|m| Box::new(m) as Box<dyn PoseModel>),
            now,
        )
    }

    /// Select the garment at `index` and start loading its image
    pub fn select_garment(&mut self, index: usize) -> Result<&Garment, CatalogError> {
        let garment = self.state.catalog.select(index)?;
        request_image(&mut self.loader, garment);
        Ok(garment)
    }

    /// Select a garment by id and start loading its image
    pub fn select_by_id(&mut self, id: &str) -> Result<&Garment, CatalogError> {
        let garment = self.state.catalog.select_by_id(id)?;
        request_image(&mut self.loader, garment);
        Ok(garment)
    }

    pub fn select_next(&mut self) -> Option<&Garment> {
        let garment = self.state.catalog.select_next()?;
        request_image(&mut self.loader, garment);
        Some(garment)
    }

    pub fn select_previous(&mut self) -> Option<&Garment> {
        let garment = self.state.catalog.select_previous()?;
        request_image(&mut self.loader, garment);
        Some(garment)
    }

    /// Clear the selection; no overlay is drawn until another garment is chosen
    pub fn deselect(&mut self) {
        self.state.catalog.deselect();
        self.loader.clear();
    }

    /// Interval between rendered frames
    pub fn frame_duration(&self) -> Duration {
        self.pacer.frame_duration()
    }

    /// Whether a frame is due
    pub fn poll(&mut self, now: Instant) -> Tick {
        self.pacer.poll(now)
    }

    /// Pull the newest camera frame and hand it to the pose worker
    pub fn update(&mut self) {
        if let Some(frame) = self.camera.as_ref().and_then(|camera| camera.latest_frame()) {
            let is_new = self
                .current_frame
                .as_ref()
                .map_or(true, |current| current.frame_number != frame.frame_number);

            if is_new {
                if !self.state.camera_ready {
                    log::info!("Camera ready ({}x{})", frame.width, frame.height);
                    self.state.camera_ready = true;
                }
                self.canvas.resize(frame.width, frame.height);
                if let Some(landmarks) = &mut self.landmarks {
                    landmarks.submit(&frame);
                }
                self.current_frame = Some(frame);
            }
        }

        if let Some(landmarks) = &self.landmarks {
            self.state.status = match landmarks.status() {
                SourceStatus::Loading => StatusMessage::LoadingModel,
                SourceStatus::Ready | SourceStatus::Stopped => StatusMessage::None,
                SourceStatus::Failed(_) => StatusMessage::ModelUnavailable,
            };
        }
    }

    /// Draw one frame onto the canvas
    pub fn render_frame(&mut self, now: Instant) -> &FrameReport {
        let pose = self
            .state
            .latest_pose
            .latest()
            .filter(|pose| !pose.is_stale(now, self.config.render.pose_max_age()));
        let overlay = if self.state.catalog.selected().is_some() {
            self.loader.current()
        } else {
            None
        };

        let inputs = FrameInputs {
            camera_ready: self.state.camera_ready,
            camera_frame: self.current_frame.as_ref(),
            overlay: overlay.as_deref(),
            pose: pose.as_ref(),
            params: &self.config.placement,
            opacity: self.config.render.overlay_opacity,
        };
        self.last_report = render::render_frame(&mut self.canvas, &inputs);
        self.stats.record_frame(now);
        &self.last_report
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &TryOnConfig {
        &self.config
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Report of the most recently drawn frame
    pub fn last_report(&self) -> &FrameReport {
        &self.last_report
    }

    pub fn status_text(&self) -> Option<&'static str> {
        self.state.status.text()
    }

    pub fn is_render_loop_running(&self) -> bool {
        self.pacer.is_running()
    }

    /// Whether the pose worker has been started
    pub fn has_landmark_source(&self) -> bool {
        self.landmarks.is_some()
    }

    /// Frames the pose worker skipped because it was busy
    pub fn dropped_pose_frames(&self) -> u64 {
        self.landmarks.as_ref().map_or(0, LandmarkSource::dropped_frames)
    }

    /// Stop the render loop and every worker thread
    pub fn stop(&mut self) {
        self.pacer.stop();
        if let Some(mut landmarks) = self.landmarks.take() {
            landmarks.stop();
        }
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        self.loader.stop();
        log::info!("Session stopped after {} frames", self.stats.frame_count());
    }
}

fn request_image(loader: &mut GarmentImageLoader, garment: &Garment) {
    if loader.request(&garment.image) {
        log::info!("Selected garment '{}'", garment.name);
    }
}

impl Drop for TryOnSession {
    fn drop(&mut self) {
        self.stop();
    }
}
