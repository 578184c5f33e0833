use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::models::DetectionResult;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Copy of `image` with every detection outlined
pub fn draw_detections(image: &DynamicImage, result: &DetectionResult) -> RgbImage {
    let mut canvas = image.to_rgb8();

    for det in &result.boxes {
        let width = det.width().round() as u32;
        let height = det.height().round() as u32;
        if width == 0 || height == 0 {
            continue;
        }
        let rect = Rect::at(det.x1.round() as i32, det.y1.round() as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
    }

    canvas
}
