use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgb};
use shapefile::{Point, Polygon, PolygonRing, Shape};
use wmsdetect::{
    Crs, Detection, DetectionResult, Detector, GeoRaster, GeoTransform, GetMapRequest, MapService,
    TileBounds,
};

/// Gray RGB raster covering `bounds`
pub fn synthetic_raster(
    width: u32,
    height: u32,
    bounds: &TileBounds,
    crs: Option<Crs>,
) -> anyhow::Result<GeoRaster> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
    });
    let transform = GeoTransform::from_bounds(bounds, width, height)?;
    Ok(GeoRaster::new(DynamicImage::ImageRgb8(img), transform, crs))
}

/// Writes a synthetic GeoTIFF and returns its path
pub fn write_test_raster(
    dir: &Path,
    name: &str,
    bounds: &TileBounds,
    crs: Option<Crs>,
) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    synthetic_raster(100, 100, bounds, crs)?.save(&path)?;
    Ok(path)
}

pub fn detection(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
    Detection {
        x1,
        y1,
        x2,
        y2,
        confidence,
        class_id: 0,
    }
}

/// Square polygon with its lower-left corner at (`min_x`, `min_y`)
pub fn square(min_x: f64, min_y: f64, size: f64) -> Shape {
    Shape::Polygon(Polygon::new(PolygonRing::Outer(vec![
        Point::new(min_x, min_y),
        Point::new(min_x, min_y + size),
        Point::new(min_x + size, min_y + size),
        Point::new(min_x + size, min_y),
        Point::new(min_x, min_y),
    ])))
}

/// A `.shp`/`.shx` pair holding only the 100-byte header (no records)
pub fn write_empty_shapefile(path: &Path) -> anyhow::Result<()> {
    let mut header = vec![0u8; 100];
    header[0..4].copy_from_slice(&9994i32.to_be_bytes());
    // File length in 16-bit words: header only
    header[24..28].copy_from_slice(&50i32.to_be_bytes());
    header[28..32].copy_from_slice(&1000i32.to_le_bytes());
    // Polygon
    header[32..36].copy_from_slice(&5i32.to_le_bytes());

    fs::write(path, &header)?;
    fs::write(path.with_extension("shx"), &header)?;
    Ok(())
}

/// Files in `dir` whose name starts with `prefix` and ends with `suffix`
pub fn files_matching(dir: &Path, prefix: &str, suffix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("Failed to list directory")
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
        .collect();
    names.sort();
    names
}

/// WMS stand-in rendering a synthetic GeoTIFF for every request
#[derive(Default)]
pub struct FakeWms {
    /// Requests whose bbox starts at this x fail
    pub fail_min_x: Option<f64>,
    pub delay: Option<Duration>,
    pub requests: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
}

impl FakeWms {
    pub fn failing_at(min_x: f64) -> Self {
        Self {
            fail_min_x: Some(min_x),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

impl MapService for FakeWms {
    async fn get_map(&self, request: &GetMapRequest) -> anyhow::Result<Vec<u8>> {
        self.requests.fetch_add(1, SeqCst);
        let now = self.in_flight.fetch_add(1, SeqCst) + 1;
        self.max_in_flight.fetch_max(now, SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, SeqCst);

        if self.fail_min_x == Some(request.bbox.min_x) {
            anyhow::bail!("simulated WMS outage");
        }

        synthetic_raster(request.width, request.height, &request.bbox, Some(request.srs))?
            .to_bytes()
    }
}

/// Detector returning a fixed set of boxes
#[derive(Default)]
pub struct FakeDetector {
    pub boxes: Vec<Detection>,
    pub fail: bool,
    pub seen: Mutex<Vec<PathBuf>>,
}

impl FakeDetector {
    pub fn with_boxes(boxes: Vec<Detection>) -> Self {
        Self {
            boxes,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl Detector for FakeDetector {
    fn detect(&self, image_path: &Path, confidence: f32) -> anyhow::Result<DetectionResult> {
        self.seen.lock().unwrap().push(image_path.to_path_buf());

        if !image_path.exists() {
            anyhow::bail!("raster {} was not written", image_path.display());
        }
        if self.fail {
            anyhow::bail!("simulated model failure");
        }

        Ok(DetectionResult::new(
            self.boxes
                .iter()
                .filter(|b| b.confidence >= confidence)
                .copied()
                .collect(),
        ))
    }
}
