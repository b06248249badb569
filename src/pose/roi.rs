//! Square region of interest fed to the landmark network
//!
//! The network expects an undistorted square crop of the person. Without a
//! tracked region the whole frame is letterboxed into a square; once a person
//! is tracked, the next crop is the padded bounding square of their landmarks.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba, RgbaImage};

use super::Landmark;
use crate::camera::CameraFrame;

/// Square region of a frame in frame pixels
///
/// The region may extend past the frame edges; those parts are fed to the
/// network as black.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareRoi {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Edge length
    pub size: f32,
}

impl SquareRoi {
    /// Smallest square holding the whole frame, centered on it
    pub fn full_frame(width: u32, height: u32) -> Self {
        let size = width.max(height).max(1) as f32;
        Self {
            x: (width as f32 - size) / 2.0,
            y: (height as f32 - size) / 2.0,
            size,
        }
    }

    /// Square around the bounding box of `landmarks` (normalized frame
    /// coordinates), grown by `padding` times its longest edge on every side
    ///
    /// Non-finite landmarks are skipped. Returns `None` when no usable box remains.
    pub fn around(landmarks: &[Landmark], width: u32, height: u32, padding: f32) -> Option<Self> {
        let mut points = landmarks
            .iter()
            .filter(|lm| lm.is_finite())
            .map(|lm| (lm.x * width as f32, lm.y * height as f32));

        let (x, y) = points.next()?;
        let (min_x, min_y, max_x, max_y) = points.fold((x, y, x, y), |(x0, y0, x1, y1), (x, y)| {
            (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        });

        let edge = (max_x - min_x).max(max_y - min_y);
        if !(edge.is_finite() && edge > 0.0) {
            return None;
        }

        let size = edge * (1.0 + 2.0 * padding.max(0.0));
        Some(Self {
            x: (min_x + max_x) / 2.0 - size / 2.0,
            y: (min_y + max_y) / 2.0 - size / 2.0,
            size,
        })
    }

    /// Map a landmark normalized to this region back to normalized frame coordinates
    pub fn to_frame(&self, landmark: Landmark, width: u32, height: u32) -> Landmark {
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        Landmark {
            x: (self.x + landmark.x * self.size) / width,
            y: (self.y + landmark.y * self.size) / height,
            z: landmark.z * self.size / width,
            visibility: landmark.visibility,
        }
    }

    /// Sample this region of `frame` into an `input_size` square image
    pub fn crop(&self, frame: &CameraFrame, input_size: u32) -> RgbaImage {
        let mut input = RgbaImage::from_pixel(input_size, input_size, Rgba([0, 0, 0, 255]));
        let Some(view) =
            ImageBuffer::<Rgba<u8>, Arc<[u8]>>::from_raw(frame.width, frame.height, frame.data.clone())
        else {
            return input;
        };

        // Part of the region that lies inside the frame
        let left = self.x.max(0.0).floor();
        let top = self.y.max(0.0).floor();
        let right = (self.x + self.size).min(frame.width as f32).ceil();
        let bottom = (self.y + self.size).min(frame.height as f32).ceil();
        if right - left < 1.0 || bottom - top < 1.0 {
            return input;
        }

        let scale = input_size as f32 / self.size;
        let visible = imageops::crop_imm(
            &view,
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        )
        .to_image();
        let scaled = imageops::resize(
            &visible,
            ((right - left) * scale).round().max(1.0) as u32,
            ((bottom - top) * scale).round().max(1.0) as u32,
            FilterType::Triangle,
        );

        imageops::replace(
            &mut input,
            &scaled,
            ((left - self.x) * scale).round() as i64,
            ((top - self.y) * scale).round() as i64,
        );
        input
    }
}

/// RGB floats in [0, 1], HWC order
pub(crate) fn to_nhwc(image: &RgbaImage) -> Vec<f32> {
    image
        .pixels()
        .flat_map(|px| [px[0], px[1], px[2]])
        .map(|c| c as f32 / 255.0)
        .collect()
}
