use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, warn};

use super::Crs;

const GCS_WGS_1984: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// ESRI-flavoured WKT for the systems we can describe without a projection database
pub fn esri_wkt(crs: Crs) -> Option<String> {
    if crs == Crs::WGS84 {
        return Some(GCS_WGS_1984.to_string());
    }

    let (zone, north) = crs.utm_zone()?;
    let central_meridian = -183.0 + 6.0 * zone as f64;
    let false_northing = if north { 0.0 } else { 10_000_000.0 };
    let hemisphere = if north { 'N' } else { 'S' };

    Some(format!(
        r#"PROJCS["WGS_1984_UTM_Zone_{zone}{hemisphere}",{GCS_WGS_1984},PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",{false_northing:.1}],PARAMETER["Central_Meridian",{central_meridian:.1}],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#
    ))
}

/// Write the `.prj` sidecar next to `shp_path`. Returns false when `crs` has no known WKT.
pub fn write_prj(shp_path: &Path, crs: Crs) -> anyhow::Result<bool> {
    let Some(wkt) = esri_wkt(crs) else {
        warn!(
            "No WKT definition for {}; {} is written without a .prj file",
            crs,
            shp_path.display()
        );
        return Ok(false);
    };

    let prj_path = shp_path.with_extension("prj");
    fs::write(&prj_path, wkt)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", prj_path.display(), e))?;
    Ok(true)
}

/// Delete the `.prj` next to `shp_path` if one exists
pub fn remove_stale_prj(shp_path: &Path) -> anyhow::Result<()> {
    let prj_path = shp_path.with_extension("prj");
    match fs::remove_file(&prj_path) {
        Ok(()) => {
            debug!("Removed stale {}", prj_path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to remove {}: {}", prj_path.display(), e)),
    }
}
