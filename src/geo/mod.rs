pub mod prj;
pub mod raster;

use std::fmt;
use std::str::FromStr;

use crate::models::TileBounds;

pub use raster::{GeoRaster, RasterHeader};

/// Affine pixel-to-world transform.
///
/// `x = a * col + b * row + c`, `y = d * col + e * row + f`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    /// Build a transform, rejecting non-finite or non-invertible coefficients
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> anyhow::Result<Self> {
        let transform = Self { a, b, c, d, e, f };

        if ![a, b, c, d, e, f].iter().all(|v| v.is_finite()) {
            anyhow::bail!("Affine transform has non-finite coefficients: {:?}", transform);
        }
        if transform.determinant() == 0.0 {
            anyhow::bail!("Affine transform is degenerate (zero determinant): {:?}", transform);
        }

        Ok(transform)
    }

    /// From a GeoTIFF ModelTiepointTag (`i j k x y z`) and ModelPixelScaleTag (`sx sy sz`)
    pub fn from_tiepoint(tiepoint: &[f64], scale: &[f64]) -> anyhow::Result<Self> {
        if tiepoint.len() < 6 {
            anyhow::bail!("ModelTiepointTag needs 6 values, got {}", tiepoint.len());
        }
        if scale.len() < 2 {
            anyhow::bail!("ModelPixelScaleTag needs at least 2 values, got {}", scale.len());
        }

        let (i, j) = (tiepoint[0], tiepoint[1]);
        let (x, y) = (tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);

        Self::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy)
    }

    /// From a GeoTIFF ModelTransformationTag (row-major 4x4 matrix)
    pub fn from_model_transformation(matrix: &[f64]) -> anyhow::Result<Self> {
        if matrix.len() < 16 {
            anyhow::bail!("ModelTransformationTag needs 16 values, got {}", matrix.len());
        }
        Self::new(matrix[0], matrix[1], matrix[3], matrix[4], matrix[5], matrix[7])
    }

    /// North-up transform for `bounds` rendered into `width` x `height` pixels
    pub fn from_bounds(bounds: &TileBounds, width: u32, height: u32) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Raster size must be non-zero, got {}x{}", width, height);
        }
        let sx = bounds.width() / width as f64;
        let sy = bounds.height() / height as f64;
        Self::new(sx, 0.0, bounds.min_x, 0.0, -sy, bounds.max_y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Apply the transform to fractional pixel coordinates (column, row)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Pixel size as `(sx, sy)` when the transform has no rotation terms
    pub fn pixel_scale(&self) -> Option<(f64, f64)> {
        if self.b == 0.0 && self.d == 0.0 {
            Some((self.a, -self.e))
        } else {
            None
        }
    }

    /// Row-major 4x4 matrix for ModelTransformationTag
    pub fn to_model_transformation(&self) -> [f64; 16] {
        [
            self.a, self.b, 0.0, self.c, //
            self.d, self.e, 0.0, self.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// World coordinate of the center of pixel (`pixel_x`, `pixel_y`)
pub fn pixel_to_geo(pixel_x: f64, pixel_y: f64, transform: &GeoTransform) -> (f64, f64) {
    transform.apply(pixel_x + 0.5, pixel_y + 0.5)
}

/// Coordinate reference system identified by its EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs::epsg(4326);
    pub const UTM_33N: Crs = Crs::epsg(32633);

    pub const fn epsg(code: u32) -> Self {
        Self { epsg: code }
    }

    pub fn code(&self) -> u32 {
        self.epsg
    }

    /// EPSG geographic 2D systems live in the 4000 range
    pub fn is_geographic(&self) -> bool {
        (4000..5000).contains(&self.epsg)
    }

    /// WGS 84 / UTM zone as `(zone, north)`
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        match self.epsg {
            32601..=32660 => Some((self.epsg - 32600, true)),
            32701..=32760 => Some((self.epsg - 32700, false)),
            _ => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some((authority, _)) => anyhow::bail!("Unsupported CRS authority: {}", authority),
            None => trimmed,
        };
        let code: u32 = code
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid EPSG code '{}': {}", s, e))?;
        Ok(Crs::epsg(code))
    }
}

const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// Extract the CRS from a GeoKeyDirectoryTag.
/// Projected keys win over geographic ones; user-defined systems are dropped.
pub(crate) fn crs_from_geokeys(directory: &[u16]) -> Option<Crs> {
    if directory.len() < 4 {
        return None;
    }
    let count = directory[3] as usize;

    let mut projected = None;
    let mut geographic = None;

    for entry in directory[4..].chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Only inline SHORT values carry EPSG codes
        if location != 0 || value == USER_DEFINED || value == 0 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(Crs::epsg(value as u32)),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(Crs::epsg(value as u32)),
            _ => {}
        }
    }

    projected.or(geographic)
}

/// Build a GeoKeyDirectoryTag for `crs` (PixelIsArea raster space)
pub(crate) fn geokeys_for(crs: Option<Crs>) -> Vec<u16> {
    let mut keys: Vec<[u16; 4]> = vec![[GT_RASTER_TYPE_GEO_KEY, 0, 1, 1]];

    if let Some(crs) = crs {
        // EPSG codes above u16::MAX cannot be stored inline
        if let Ok(code) = u16::try_from(crs.code()) {
            if crs.is_geographic() {
                keys.insert(0, [GT_MODEL_TYPE_GEO_KEY, 0, 1, 2]);
                keys.push([GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]);
            } else {
                keys.insert(0, [GT_MODEL_TYPE_GEO_KEY, 0, 1, 1]);
                keys.push([PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
            }
        }
    }

    let mut directory = vec![1, 1, 0, keys.len() as u16];
    directory.extend(keys.into_iter().flatten());
    directory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geokeys_prefer_projected_system() {
        let directory = [1, 1, 0, 3, 1024, 0, 1, 1, 2048, 0, 1, 4326, 3072, 0, 1, 32633];
        assert_eq!(crs_from_geokeys(&directory), Some(Crs::UTM_33N));
    }

    #[test]
    fn geokeys_skip_user_defined_and_referenced_values() {
        let directory = [1, 1, 0, 2, 3072, 0, 1, USER_DEFINED, 2048, 34736, 1, 0];
        assert_eq!(crs_from_geokeys(&directory), None);
        assert_eq!(crs_from_geokeys(&[1, 1]), None);
    }

    #[test]
    fn geokeys_written_for_geographic_crs() {
        let directory = geokeys_for(Some(Crs::WGS84));
        assert_eq!(directory[3], 3);
        assert_eq!(crs_from_geokeys(&directory), Some(Crs::WGS84));
        assert_eq!(crs_from_geokeys(&geokeys_for(None)), None);
    }

    #[test]
    fn crs_parses_epsg_strings() {
        assert_eq!("EPSG:32633".parse::<Crs>().unwrap(), Crs::UTM_33N);
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("3857".parse::<Crs>().unwrap(), Crs::epsg(3857));
        assert!("ESRI:102100".parse::<Crs>().is_err());
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert_eq!(Crs::UTM_33N.to_string(), "EPSG:32633");
    }
}
