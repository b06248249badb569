//! Background garment image loading
//!
//! Selecting a garment only requests its image; decoding happens on a worker
//! thread. The overlay is drawn once the most recent request has finished, and
//! results of superseded requests are discarded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use parking_lot::Mutex;
use thiserror::Error;

/// Image loading errors
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Failed to load image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to spawn image loader: {0}")]
    Spawn(#[from] std::io::Error),
}

/// State of the most recent load request
#[derive(Clone, Debug, Default)]
pub enum AssetState {
    /// Nothing requested
    #[default]
    Empty,
    /// Decoding in progress
    Loading(PathBuf),
    /// Image decoded
    Ready(Arc<RgbaImage>),
    /// Decoding failed
    Failed(String),
}

struct LoadRequest {
    generation: u64,
    path: PathBuf,
}

struct Slot {
    generation: u64,
    state: AssetState,
}

/// Decodes garment images on a worker thread
pub struct GarmentImageLoader {
    slot: Arc<Mutex<Slot>>,
    request_sender: Option<Sender<LoadRequest>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    generation: u64,
    /// Path of the most recent request
    requested: Option<PathBuf>,
}

impl GarmentImageLoader {
    /// Start the loader thread
    pub fn spawn() -> Result<Self, AssetError> {
        let slot = Arc::new(Mutex::new(Slot {
            generation: 0,
            state: AssetState::Empty,
        }));
        let (request_sender, request_receiver) = crossbeam_channel::unbounded();

        let slot_clone = slot.clone();
        let thread_handle = std::thread::Builder::new()
            .name("garment-loader".to_string())
            .spawn(move || Self::loader_thread(request_receiver, slot_clone))?;

        Ok(Self {
            slot,
            request_sender: Some(request_sender),
            thread_handle: Some(thread_handle),
            generation: 0,
            requested: None,
        })
    }

    fn loader_thread(requests: Receiver<LoadRequest>, slot: Arc<Mutex<Slot>>) {
        while let Ok(mut request) = requests.recv() {
            // Only the newest pending request matters
            while let Ok(newer) = requests.try_recv() {
                request = newer;
            }
            if slot.lock().generation != request.generation {
                continue;
            }

            let state = match load_rgba(&request.path) {
                Ok(image) => {
                    log::info!(
                        "Loaded garment image {:?} ({}x{})",
                        request.path,
                        image.width(),
                        image.height()
                    );
                    AssetState::Ready(Arc::new(image))
                }
                Err(e) => {
                    log::error!("{}", e);
                    AssetState::Failed(e.to_string())
                }
            };

            let mut slot = slot.lock();
            if slot.generation == request.generation {
                slot.state = state;
            }
        }
        log::debug!("Garment loader stopped");
    }

    /// Request `path`; supersedes any earlier request
    ///
    /// Repeating the current request is a no-op unless that load failed.
    /// Returns true if a new load was started.
    pub fn request(&mut self, path: &Path) -> bool {
        if self.requested.as_deref() == Some(path)
            && !matches!(self.state(), AssetState::Failed(_) | AssetState::Empty)
        {
            return false;
        }

        self.requested = Some(path.to_path_buf());
        self.generation += 1;
        {
            let mut slot = self.slot.lock();
            slot.generation = self.generation;
            slot.state = AssetState::Loading(path.to_path_buf());
        }

        if let Some(sender) = &self.request_sender {
            let _ = sender.send(LoadRequest {
                generation: self.generation,
                path: path.to_path_buf(),
            });
        }
        true
    }

    /// Forget the current image
    pub fn clear(&mut self) {
        self.requested = None;
        self.generation += 1;
        let mut slot = self.slot.lock();
        slot.generation = self.generation;
        slot.state = AssetState::Empty;
    }

    /// State of the most recent request
    pub fn state(&self) -> AssetState {
        self.slot.lock().state.clone()
    }

    /// The requested image, once it has finished loading
    pub fn current(&self) -> Option<Arc<RgbaImage>> {
        match &self.slot.lock().state {
            AssetState::Ready(image) => Some(image.clone()),
            _ => None,
        }
    }

    /// Stop the loader thread
    pub fn stop(&mut self) {
        self.request_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GarmentImageLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn load_rgba(path: &Path) -> Result<RgbaImage, AssetError> {
    image::open(path)
        .map(|image| image.to_rgba8())
        .map_err(|source| AssetError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Load a preview no larger than `max_edge` on either side
pub fn load_thumbnail(path: &Path, max_edge: u32) -> Result<RgbaImage, AssetError> {
    let image = load_rgba(path)?;
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_edge {
        return Ok(image);
    }

    let scale = max_edge as f32 / longest as f32;
    let thumb_width = ((width as f32 * scale).round() as u32).max(1);
    let thumb_height = ((height as f32 * scale).round() as u32).max(1);
    Ok(image::imageops::thumbnail(&image, thumb_width, thumb_height))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use image::Rgba;

    use super::*;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn wait_settled(loader: &GarmentImageLoader) -> AssetState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = loader.state();
            if !matches!(state, AssetState::Loading(_)) || Instant::now() > deadline {
                return state;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_loads_requested_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "dress.png", 3, 5);

        let mut loader = GarmentImageLoader::spawn().unwrap();
        assert!(loader.current().is_none());

        loader.request(&path);
        assert!(matches!(wait_settled(&loader), AssetState::Ready(_)));

        let image = loader.current().unwrap();
        assert_eq!(image.dimensions(), (3, 5));
        assert_eq!(image.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_missing_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = GarmentImageLoader::spawn().unwrap();

        loader.request(&dir.path().join("missing.png"));
        assert!(matches!(wait_settled(&loader), AssetState::Failed(_)));
        assert!(loader.current().is_none());
    }

    #[test]
    fn test_latest_request_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_png(dir.path(), "first.png", 2, 2);
        let second = write_png(dir.path(), "second.png", 4, 1);

        let mut loader = GarmentImageLoader::spawn().unwrap();
        loader.request(&first);
        loader.request(&second);

        assert!(matches!(wait_settled(&loader), AssetState::Ready(_)));
        assert_eq!(loader.current().unwrap().dimensions(), (4, 1));
    }

    #[test]
    fn test_repeated_request_keeps_loaded_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "dress.png", 2, 2);

        let mut loader = GarmentImageLoader::spawn().unwrap();
        assert!(loader.request(&path));
        assert!(matches!(wait_settled(&loader), AssetState::Ready(_)));

        assert!(!loader.request(&path));
        assert!(matches!(loader.state(), AssetState::Ready(_)));
        assert!(loader.current().is_some());
    }

    #[test]
    fn test_failed_request_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.png");

        let mut loader = GarmentImageLoader::spawn().unwrap();
        assert!(loader.request(&path));
        assert!(matches!(wait_settled(&loader), AssetState::Failed(_)));

        write_png(dir.path(), "late.png", 3, 3);
        assert!(loader.request(&path));
        assert!(matches!(wait_settled(&loader), AssetState::Ready(_)));
    }

    #[test]
    fn test_clear_hides_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "dress.png", 2, 2);

        let mut loader = GarmentImageLoader::spawn().unwrap();
        loader.request(&path);
        wait_settled(&loader);
        loader.clear();
        assert!(loader.current().is_none());
    }

    #[test]
    fn test_thumbnail_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let wide = write_png(dir.path(), "wide.png", 200, 100);
        let small = write_png(dir.path(), "small.png", 20, 10);

        assert_eq!(load_thumbnail(&wide, 64).unwrap().dimensions(), (64, 32));
        assert_eq!(load_thumbnail(&small, 64).unwrap().dimensions(), (20, 10));
    }
}
