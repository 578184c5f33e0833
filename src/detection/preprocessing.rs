use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Gray value YOLO models are trained with for padding
const PAD_VALUE: u8 = 114;

/// How a source image was placed into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    /// Map a point in model-input space back to source pixels
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Resize `image` into a `size` x `size` canvas keeping its aspect ratio, centered and padded
pub fn letterbox(image: &RgbImage, size: u32) -> anyhow::Result<(RgbImage, Letterbox)> {
    let (width, height) = image.dimensions();
    if size == 0 {
        anyhow::bail!("Model input size must be at least 1 pixel");
    }
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot letterbox an empty {}x{} image", width, height);
    }

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    let pad_x = (size - scaled_w) / 2;
    let pad_y = (size - scaled_h) / 2;

    if (scaled_w, scaled_h) == (width, height) {
        imageops::overlay(&mut canvas, image, pad_x.into(), pad_y.into());
    } else {
        let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
        imageops::overlay(&mut canvas, &resized, pad_x.into(), pad_y.into());
    }

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    ))
}

/// Planar RGB (CHW) values scaled to [0, 1]
pub fn to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for channel in 0..3 {
            data[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }

    data
}
