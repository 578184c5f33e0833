use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing, Shape};

use crate::geo::prj::{remove_stale_prj, write_prj};
use crate::geo::{RasterHeader, pixel_to_geo};
use crate::models::{DetectionResult, TileBounds};

/// Attribute holding the detection score (dBase names are at most 10 chars)
pub const CONFIDENCE_FIELD: &str = "confidence";

/// A vector feature: geometry plus its attribute row
pub type Feature = (Shape, Record);

/// Closed, clockwise ring spanning two opposite corners
fn box_polygon(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
    let (min_x, max_x) = (x0.min(x1), x0.max(x1));
    let (min_y, max_y) = (y0.min(y1), y0.max(y1));

    Polygon::new(PolygonRing::Outer(vec![
        Point::new(min_x, min_y),
        Point::new(min_x, max_y),
        Point::new(max_x, max_y),
        Point::new(max_x, min_y),
        Point::new(min_x, min_y),
    ]))
}

/// Write every detection box as a polygon with its confidence.
///
/// Each raster path is opened for its transform; the first CRS found is used for
/// the whole file. Nothing is written when there are no boxes, and `Ok(None)` is
/// returned in that case.
pub fn create_shapefile<P: AsRef<Path>>(
    predictions: &[(P, DetectionResult)],
    output_shp: &Path,
) -> anyhow::Result<Option<PathBuf>> {
    let mut geometries = Vec::new();
    let mut scores = Vec::new();
    let mut crs = None;

    for (tile_path, result) in predictions {
        let header = RasterHeader::read(tile_path)?;
        if crs.is_none() {
            crs = header.crs;
        }

        for det in &result.boxes {
            let (x_min, y_min) = pixel_to_geo(det.x1 as f64, det.y1 as f64, &header.transform);
            let (x_max, y_max) = pixel_to_geo(det.x2 as f64, det.y2 as f64, &header.transform);
            geometries.push(box_polygon(x_min, y_min, x_max, y_max));
        }
        scores.extend(result.confidences());
    }

    if geometries.is_empty() {
        debug!("No detections, skipping {}", output_shp.display());
        return Ok(None);
    }

    let field = FieldName::try_from(CONFIDENCE_FIELD)
        .map_err(|e| anyhow::anyhow!("Invalid field name {}: {:?}", CONFIDENCE_FIELD, e))?;
    let table = TableWriterBuilder::new().add_numeric_field(field, 18, 6);

    let mut writer = shapefile::Writer::from_path(output_shp, table)
        .with_context(|| format!("Failed to create {}", output_shp.display()))?;

    for (polygon, score) in geometries.iter().zip(&scores) {
        let mut record = Record::default();
        record.insert(
            CONFIDENCE_FIELD.to_string(),
            FieldValue::Numeric(Some(*score as f64)),
        );
        writer
            .write_shape_and_record(polygon, &record)
            .with_context(|| format!("Failed to write feature to {}", output_shp.display()))?;
    }
    // Headers are finalised when the writer is dropped
    drop(writer);

    // A sidecar left by an earlier run would mislabel the new file
    let prj_written = match crs {
        Some(crs) => write_prj(output_shp, crs)?,
        None => false,
    };
    if !prj_written {
        remove_stale_prj(output_shp)?;
    }

    debug!(
        "Wrote {} features to {}",
        geometries.len(),
        output_shp.display()
    );
    Ok(Some(output_shp.to_path_buf()))
}

/// Load every feature of a shapefile. Returns `None` when it holds no features.
pub fn read_and_filter_shapefile<P: AsRef<Path>>(
    filepath: P,
) -> anyhow::Result<Option<Vec<Feature>>> {
    let filepath = filepath.as_ref();

    let shapes = shapefile::read_shapes(filepath)
        .with_context(|| format!("Failed to read shapes from {}", filepath.display()))?;
    if shapes.is_empty() {
        return Ok(None);
    }

    let features = shapefile::read(filepath)
        .with_context(|| format!("Failed to read {}", filepath.display()))?;
    // Features are returned as-is; no spatial filter is applied
    Ok(Some(features))
}

/// Bounding box of any non-null geometry
pub fn shape_bounds(shape: &Shape) -> anyhow::Result<TileBounds> {
    macro_rules! bbox {
        ($geom:expr) => {{
            let bbox = $geom.bbox();
            TileBounds::new(bbox.min.x, bbox.min.y, bbox.max.x, bbox.max.y)
        }};
    }

    let bounds = match shape {
        Shape::Point(p) => TileBounds::new(p.x, p.y, p.x, p.y),
        Shape::PointM(p) => TileBounds::new(p.x, p.y, p.x, p.y),
        Shape::PointZ(p) => TileBounds::new(p.x, p.y, p.x, p.y),
        Shape::Polyline(g) => bbox!(g),
        Shape::PolylineM(g) => bbox!(g),
        Shape::PolylineZ(g) => bbox!(g),
        Shape::Polygon(g) => bbox!(g),
        Shape::PolygonM(g) => bbox!(g),
        Shape::PolygonZ(g) => bbox!(g),
        Shape::Multipoint(g) => bbox!(g),
        Shape::MultipointM(g) => bbox!(g),
        Shape::MultipointZ(g) => bbox!(g),
        Shape::Multipatch(g) => bbox!(g),
        Shape::NullShape => anyhow::bail!("Null geometry has no bounds"),
    };

    if ![bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y]
        .iter()
        .all(|v| v.is_finite())
    {
        anyhow::bail!("Geometry has non-finite bounds: {:?}", bounds);
    }

    Ok(bounds)
}
