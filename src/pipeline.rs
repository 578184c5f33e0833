use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, info, warn};
use shapefile::Shape;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::detection::overlay::draw_detections;
use crate::detection::{DEFAULT_CONFIDENCE, Detector};
use crate::geo::{Crs, GeoRaster};
use crate::models::TileBounds;
use crate::shapes::{create_shapefile, shape_bounds};
use crate::wms::{DEFAULT_FORMAT, DEFAULT_TILE_SIZE, GetMapRequest, MapService, WmsVersion};

/// Number of tiles processed at the same time
pub const DEFAULT_WORKERS: usize = 16;

type TileHandle = JoinHandle<anyhow::Result<TileOutcome>>;

/// Debug configuration for tile processing
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Directory receiving annotated tile images
    pub output_dir: PathBuf,
}

/// Settings shared by every tile of a run
#[derive(Clone, Debug)]
pub struct TileConfig {
    pub srs: Crs,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub transparent: bool,
    pub version: WmsVersion,
    pub confidence: f32,
    pub workers: usize,
    pub debug: Option<DebugConfig>,
}

impl TileConfig {
    pub fn new() -> Self {
        Self {
            srs: Crs::UTM_33N,
            width: DEFAULT_TILE_SIZE,
            height: DEFAULT_TILE_SIZE,
            format: DEFAULT_FORMAT.to_string(),
            transparent: true,
            version: WmsVersion::default(),
            confidence: DEFAULT_CONFIDENCE,
            workers: DEFAULT_WORKERS,
            debug: None,
        }
    }

    pub fn with_srs(mut self, srs: Crs) -> Self {
        self.srs = srs;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_version(mut self, version: WmsVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> anyhow::Result<Self> {
        if output_dir.exists() {
            let entries = fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });

        Ok(self)
    }

    /// GetMap request for one tile
    pub fn request(&self, layer_name: &str, bbox: TileBounds) -> GetMapRequest {
        GetMapRequest {
            layer: layer_name.to_string(),
            srs: self.srs,
            bbox,
            width: self.width,
            height: self.height,
            format: self.format.clone(),
            transparent: self.transparent,
            version: self.version,
        }
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one processed tile
#[derive(Debug, Clone)]
pub struct TileOutcome {
    pub index: usize,
    pub detections: usize,
    /// `None` when the tile had no detections and no file was written
    pub shapefile: Option<PathBuf>,
}

pub fn temp_raster_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("wms_image_{}.tif", index))
}

pub fn tile_shapefile_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("bbox_{}.shp", index))
}

/// File removed when the guard goes out of scope, on success and on error
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Fetch one tile, run the model on it and write `bbox_<index>.shp`
pub async fn process_tile<M, D>(
    index: usize,
    bbox: TileBounds,
    wms: &M,
    layer_name: &str,
    model: Arc<D>,
    output_dir: &Path,
    config: &TileConfig,
) -> anyhow::Result<TileOutcome>
where
    M: MapService + ?Sized,
    D: Detector + ?Sized + 'static,
{
    let request = config.request(layer_name, bbox);
    let response = wms
        .get_map(&request)
        .await
        .with_context(|| format!("Tile {}: WMS request failed", index))?;

    // Decoding, inference and file I/O block, keep them off the async workers
    let output_dir = output_dir.to_path_buf();
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        detect_tile(index, &response, model.as_ref(), &output_dir, &config)
    })
    .await
    .with_context(|| format!("Tile {}: worker panicked", index))?
}

fn detect_tile<D: Detector + ?Sized>(
    index: usize,
    response: &[u8],
    model: &D,
    output_dir: &Path,
    config: &TileConfig,
) -> anyhow::Result<TileOutcome> {
    let raster = GeoRaster::from_bytes(response)
        .with_context(|| format!("Tile {}: WMS response is not a valid GeoTIFF", index))?;

    let temp_tif = TempFile::new(temp_raster_path(output_dir, index));
    raster.save(temp_tif.path())?;

    let result = model
        .detect(temp_tif.path(), config.confidence)
        .with_context(|| format!("Tile {}: detection failed", index))?;

    if let Some(debug_config) = &config.debug {
        let debug_path = debug_config.output_dir.join(format!("bbox_{}.png", index));
        draw_detections(&raster.image, &result)
            .save(&debug_path)
            .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;
        debug!("Tile {}: saved {}", index, debug_path.display());
    }

    let detections = result.len();
    let predictions = [(temp_tif.path().to_path_buf(), result)];
    let shapefile = create_shapefile(&predictions, &tile_shapefile_path(output_dir, index))?;

    drop(temp_tif);
    debug!("Tile {}: {} detections", index, detections);

    Ok(TileOutcome {
        index,
        detections,
        shapefile,
    })
}

/// Process every geometry's bounding box as an independent tile.
///
/// At most `config.workers` tiles run at once. All tiles are attempted even when
/// some fail; the error of the first failing tile (in input order) is returned
/// once every task has finished.
pub async fn process_all_tiles_in_parallel<M, D>(
    geometries: &[Shape],
    wms: Arc<M>,
    layer_name: &str,
    model: Arc<D>,
    output_dir: &Path,
    config: &TileConfig,
) -> anyhow::Result<Vec<TileOutcome>>
where
    M: MapService + 'static,
    D: Detector + 'static,
{
    let tiles = geometries
        .iter()
        .enumerate()
        .map(|(i, geometry)| {
            shape_bounds(geometry)
                .with_context(|| format!("Tile {}: invalid geometry", i))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        "Processing {} tiles with {} workers",
        tiles.len(),
        config.workers
    );

    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut handles: Vec<TileHandle> = Vec::with_capacity(tiles.len());

    for (i, bbox) in tiles.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let wms = wms.clone();
        let model = model.clone();
        let layer_name = layer_name.to_string();
        let output_dir = output_dir.to_path_buf();
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("Worker pool closed")?;
            debug!("Tile {}: bbox {}", i, bbox.to_bbox_param());
            process_tile(
                i,
                bbox,
                wms.as_ref(),
                &layer_name,
                model,
                &output_dir,
                &config,
            )
            .await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for (i, handle) in handles.into_iter().enumerate() {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                let context = format!("Tile {}: task panicked", i);
                Err(anyhow::Error::new(e).context(context))
            }
        };
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let with_detections = outcomes.iter().filter(|o| o.shapefile.is_some()).count();
    info!(
        "Processed {} tiles, {} with detections",
        outcomes.len(),
        with_detections
    );

    Ok(outcomes)
}
