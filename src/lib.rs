pub mod dataset;
pub mod detection;
pub mod geo;
pub mod models;
pub mod pipeline;
pub mod shapes;
pub mod wms;

pub use dataset::{SplitSummary, create_train_val_split};
pub use detection::{Detector, YoloDetector};
pub use geo::{Crs, GeoRaster, GeoTransform, RasterHeader, pixel_to_geo};
pub use models::{Detection, DetectionResult, TileBounds};
pub use pipeline::{
    DebugConfig, TileConfig, TileOutcome, process_all_tiles_in_parallel, process_tile,
};
pub use shapes::{Feature, create_shapefile, read_and_filter_shapefile, shape_bounds};
pub use wms::{GetMapRequest, MapService, WmsClient, WmsVersion};
