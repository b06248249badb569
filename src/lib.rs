//! Virtual Try-On - webcam garment overlay driven by body pose landmarks
//!
//! Captures the camera feed, mirrors it, and composites a selected garment
//! image over the wearer. Placement follows the shoulders and hip reported by
//! a pose-landmark model, and falls back to fixed canvas ratios whenever no
//! usable pose is available.

pub mod app;
pub mod camera;
pub mod catalog;
pub mod compositor;
pub mod config;
pub mod placement;
pub mod pose;
pub mod render;
pub mod session;

pub use app::App;
pub use config::TryOnConfig;
pub use session::TryOnSession;
