use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use log::debug;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use crate::detection::Detector;
use crate::detection::postprocess::decode_predictions;
use crate::detection::preprocessing::{Letterbox, letterbox, to_chw};
use crate::models::DetectionResult;

pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// YOLO (v8-style head) detector running on the rten runtime
pub struct YoloDetector {
    model: Model,
    input_size: u32,
}

impl std::fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloDetector")
            .field("input_size", &self.input_size)
            .finish_non_exhaustive()
    }
}

impl YoloDetector {
    /// Load an `.rten` model file
    pub fn load<P: AsRef<Path>>(model_path: P) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            anyhow::bail!("Model file not found: {}", model_path.display());
        }

        let model = Model::load_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path.display()))?;

        Ok(Self {
            model,
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    /// Square input size the model was exported with
    pub fn with_input_size(mut self, input_size: u32) -> anyhow::Result<Self> {
        if input_size == 0 {
            anyhow::bail!("Model input size must be at least 1 pixel");
        }
        self.input_size = input_size;
        Ok(self)
    }
}

/// Letterboxed `[1, 3, size, size]` input tensor for `image`
pub(crate) fn prepare_input(
    image: &RgbImage,
    size: u32,
) -> anyhow::Result<(NdTensor<f32, 4>, Letterbox)> {
    let (input, placement) = letterbox(image, size)?;
    let side = size as usize;
    let tensor = NdTensor::from_data([1, 3, side, side], to_chw(&input));
    Ok((tensor, placement))
}

impl Detector for YoloDetector {
    fn detect(&self, image_path: &Path, confidence: f32) -> anyhow::Result<DetectionResult> {
        let img = image::open(image_path)
            .with_context(|| format!("Failed to decode image {}", image_path.display()))?
            .to_rgb8();

        let (tensor, placement) = prepare_input(&img, self.input_size)?;

        let output = self
            .model
            .run_one(tensor.view().into(), None)
            .with_context(|| format!("Inference failed on {}", image_path.display()))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| anyhow::anyhow!("Unexpected model output: {:?}", e))?;

        let boxes = decode_predictions(
            &output.to_vec(),
            output.shape(),
            confidence,
            &placement,
            img.dimensions(),
        )?;

        debug!(
            "{}: {} detections at confidence >= {}",
            image_path.display(),
            boxes.len(),
            confidence
        );

        Ok(DetectionResult::new(boxes))
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn input_tensor_is_letterboxed_chw() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
        let (tensor, placement) = prepare_input(&image, 16).unwrap();

        assert_eq!(tensor.shape(), [1, 3, 16, 16]);
        assert_eq!((placement.pad_x, placement.pad_y), (0, 4));

        // Padding rows carry the gray fill, the image rows carry red
        let gray = 114.0 / 255.0;
        assert!((tensor[[0, 0, 0, 8]] - gray).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 8, 8]], 1.0);
        assert_eq!(tensor[[0, 1, 8, 8]], 0.0);
        assert_eq!(tensor[[0, 2, 8, 8]], 0.0);
    }

    #[test]
    fn zero_input_size_is_rejected() {
        let image = RgbImage::new(8, 8);
        assert!(prepare_input(&image, 0).is_err());
    }
}
