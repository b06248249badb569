//! CPU compositor
//!
//! The drawing surface the render loop paints every frame: the mirrored camera
//! image as background, then the garment blended into its placement rectangle.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba, RgbaImage};

use crate::camera::CameraFrame;
use crate::placement::{CanvasSize, PlacementRect};

/// RGBA drawing surface sized to the camera resolution
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    /// Create a transparent canvas (dimensions are clamped to at least 1x1)
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize::from(self.image.dimensions())
    }

    /// Resize the canvas, discarding its contents; returns true if the size changed
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if self.image.dimensions() == (width, height) {
            return false;
        }
        log::info!("Resizing canvas to {}x{}", width, height);
        self.image = RgbaImage::new(width, height);
        true
    }

    /// Reset every pixel to transparent black
    pub fn clear(&mut self) {
        self.image.fill(0);
    }

    /// Draw a camera frame stretched over the whole canvas, mirrored horizontally
    pub fn draw_mirrored(&mut self, frame: &CameraFrame) {
        let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
            .filter(|_| frame.is_complete());
        let Some(view) = view else {
            log::warn!(
                "Skipping incomplete camera frame {} ({} bytes for {}x{})",
                frame.frame_number,
                frame.data.len(),
                frame.width,
                frame.height
            );
            return;
        };

        let (width, height) = self.image.dimensions();
        if view.dimensions() == (width, height) {
            self.image.copy_from_slice(view.as_raw());
        } else {
            self.image = imageops::resize(&view, width, height, FilterType::Triangle);
        }
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// Draw `src` scaled into `rect` with a global opacity (source-over blending)
    ///
    /// Negative width or height flips the image along that axis. Returns false
    /// when nothing was drawn.
    pub fn draw_image(&mut self, src: &RgbaImage, rect: PlacementRect, opacity: f32) -> bool {
        let opacity = opacity.clamp(0.0, 1.0);
        let finite = rect.x.is_finite()
            && rect.y.is_finite()
            && rect.width.is_finite()
            && rect.height.is_finite();
        if !finite || rect.is_empty() || opacity == 0.0 || src.width() == 0 || src.height() == 0 {
            return false;
        }

        let (left, right) = span(rect.x, rect.width);
        let (top, bottom) = span(rect.y, rect.height);
        let x = left.round();
        let y = top.round();
        let width = (right - left).round();
        let height = (bottom - top).round();

        let (canvas_w, canvas_h) = self.image.dimensions();
        let outside = x >= canvas_w as f32 || y >= canvas_h as f32 || x + width <= 0.0 || y + height <= 0.0;
        if width < 1.0 || height < 1.0 || outside {
            return false;
        }

        let mut overlay = imageops::resize(src, width as u32, height as u32, FilterType::Triangle);
        if rect.width < 0.0 {
            imageops::flip_horizontal_in_place(&mut overlay);
        }
        if rect.height < 0.0 {
            imageops::flip_vertical_in_place(&mut overlay);
        }
        if opacity < 1.0 {
            for px in overlay.pixels_mut() {
                px[3] = (px[3] as f32 * opacity).round() as u8;
            }
        }

        imageops::overlay(&mut self.image, &overlay, x as i64, y as i64);
        true
    }

    /// Raw RGBA bytes, row-major
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Ordered (start, end) of an extent that may be negative
fn span(origin: f32, extent: f32) -> (f32, f32) {
    if extent < 0.0 {
        (origin + extent, origin)
    } else {
        (origin, origin + extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn assert_px_near(actual: &Rgba<u8>, expected: [u8; 4]) {
        for c in 0..4 {
            assert!(
                actual[c].abs_diff(expected[c]) <= 1,
                "pixel {:?} not within 1 of {:?}",
                actual,
                expected
            );
        }
    }

    #[test]
    fn test_canvas_minimum_size() {
        let canvas = Canvas::new(0, 0);
        assert_eq!((canvas.width(), canvas.height()), (1, 1));
    }

    #[test]
    fn test_resize_reports_change() {
        let mut canvas = Canvas::new(4, 4);
        assert!(!canvas.resize(4, 4));
        assert!(canvas.resize(8, 2));
        assert_eq!(canvas.size(), CanvasSize::new(8.0, 2.0));
    }

    #[test]
    fn test_draw_mirrored_flips_columns() {
        // 3x1 frame: red, green, blue
        let frame = CameraFrame::new(
            vec![255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255],
            3,
            1,
            1,
        );
        let mut canvas = Canvas::new(3, 1);
        canvas.draw_mirrored(&frame);

        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.image().get_pixel(1, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(canvas.image().get_pixel(2, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_draw_mirrored_scales_to_canvas() {
        // 2x1 frame stretched over a 4x2 canvas
        let frame = CameraFrame::new(vec![10, 10, 10, 255, 200, 200, 200, 255], 2, 1, 1);
        let mut canvas = Canvas::new(4, 2);
        canvas.draw_mirrored(&frame);

        // Outer columns take the mirrored edge pixels, inner ones blend towards them
        for y in 0..2 {
            let row: Vec<u8> = (0..4).map(|x| canvas.image().get_pixel(x, y)[0]).collect();
            assert_eq!(row[0], 200);
            assert_eq!(row[3], 10);
            assert!(row[1] > row[2]);
            assert_eq!(canvas.image().get_pixel(1, y)[3], 255);
        }
    }

    #[test]
    fn test_clear_makes_transparent() {
        let frame = CameraFrame::new(vec![255; 4], 1, 1, 1);
        let mut canvas = Canvas::new(1, 1);
        canvas.draw_mirrored(&frame);
        canvas.clear();
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_draw_image_opacity_over_opaque_background() {
        let mut canvas = Canvas::new(4, 4);
        let black = CameraFrame::new([0, 0, 0, 255].repeat(16), 4, 4, 1);
        canvas.draw_mirrored(&black);

        let garment = solid(2, 2, [200, 100, 0, 255]);
        assert!(canvas.draw_image(&garment, PlacementRect::new(1.0, 1.0, 2.0, 2.0), 0.95));

        assert_px_near(canvas.image().get_pixel(1, 1), [190, 95, 0, 255]);
        assert_px_near(canvas.image().get_pixel(2, 2), [190, 95, 0, 255]);
        // Outside the rectangle stays untouched
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.image().get_pixel(3, 3), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_draw_image_on_transparent_canvas() {
        let mut canvas = Canvas::new(2, 2);
        let garment = solid(1, 1, [100, 150, 200, 255]);
        canvas.draw_image(&garment, PlacementRect::new(0.0, 0.0, 2.0, 2.0), 1.0);
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([100, 150, 200, 255]));
    }

    #[test]
    fn test_transparent_source_pixels_leave_background() {
        let mut canvas = Canvas::new(2, 1);
        let white = CameraFrame::new([255, 255, 255, 255].repeat(2), 2, 1, 1);
        canvas.draw_mirrored(&white);

        let garment = solid(2, 1, [0, 0, 0, 0]);
        canvas.draw_image(&garment, PlacementRect::new(0.0, 0.0, 2.0, 1.0), 0.95);
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_draw_image_clips_to_canvas() {
        let mut canvas = Canvas::new(4, 4);
        let garment = solid(4, 4, [255, 0, 0, 255]);
        assert!(canvas.draw_image(&garment, PlacementRect::new(-2.0, -2.0, 4.0, 4.0), 1.0));

        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.image().get_pixel(2, 2), &Rgba([0, 0, 0, 0]));

        // Entirely off-canvas
        assert!(!canvas.draw_image(&garment, PlacementRect::new(10.0, 10.0, 4.0, 4.0), 1.0));
    }

    #[test]
    fn test_negative_height_flips_vertically() {
        // Top row red, bottom row blue
        let mut garment = RgbaImage::new(1, 2);
        garment.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        garment.put_pixel(0, 1, Rgba([0, 0, 255, 255]));

        let mut canvas = Canvas::new(1, 2);
        // Spans y in [0, 2) drawn upwards from y = 2
        assert!(canvas.draw_image(&garment, PlacementRect::new(0.0, 2.0, 1.0, -2.0), 1.0));
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.image().get_pixel(0, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_negative_width_flips_horizontally() {
        let mut garment = RgbaImage::new(2, 1);
        garment.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        garment.put_pixel(1, 0, Rgba([0, 0, 255, 255]));

        let mut canvas = Canvas::new(2, 1);
        assert!(canvas.draw_image(&garment, PlacementRect::new(2.0, 0.0, -2.0, 1.0), 1.0));
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.image().get_pixel(1, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_degenerate_rect_draws_nothing() {
        let mut canvas = Canvas::new(2, 2);
        let garment = solid(1, 1, [255, 255, 255, 255]);
        assert!(!canvas.draw_image(&garment, PlacementRect::new(0.0, 0.0, 0.0, 2.0), 1.0));
        assert!(!canvas.draw_image(&garment, PlacementRect::new(f32::NAN, 0.0, 2.0, 2.0), 1.0));
        assert!(!canvas.draw_image(&garment, PlacementRect::new(0.0, 0.0, 2.0, 2.0), 0.0));
    }
}
