pub mod overlay;
pub mod postprocess;
pub mod preprocessing;
pub mod yolo;

use std::path::Path;

use crate::models::DetectionResult;

pub use yolo::YoloDetector;

/// Confidence threshold applied to every tile
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// An object-detection model that can be shared across worker threads
pub trait Detector: Send + Sync {
    /// Run the model on the image stored at `image_path`.
    /// Boxes are in the pixel space of that image.
    fn detect(&self, image_path: &Path, confidence: f32) -> anyhow::Result<DetectionResult>;
}
