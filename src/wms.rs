use std::fmt;
use std::future::Future;
use std::str::FromStr;

use anyhow::Context;
use log::debug;

use crate::geo::Crs;
use crate::models::TileBounds;

pub const DEFAULT_TILE_SIZE: u32 = 1024;
pub const DEFAULT_FORMAT: &str = "image/geotiff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WmsVersion {
    #[default]
    V1_1_1,
    V1_3_0,
}

impl fmt::Display for WmsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WmsVersion::V1_1_1 => write!(f, "1.1.1"),
            WmsVersion::V1_3_0 => write!(f, "1.3.0"),
        }
    }
}

impl FromStr for WmsVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.1.1" => Ok(WmsVersion::V1_1_1),
            "1.3.0" => Ok(WmsVersion::V1_3_0),
            other => anyhow::bail!("Unsupported WMS version: {} (expected 1.1.1 or 1.3.0)", other),
        }
    }
}

/// Parameters of a single GetMap call
#[derive(Debug, Clone, PartialEq)]
pub struct GetMapRequest {
    pub layer: String,
    pub srs: Crs,
    pub bbox: TileBounds,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub transparent: bool,
    pub version: WmsVersion,
}

impl GetMapRequest {
    pub fn new(layer: impl Into<String>, bbox: TileBounds) -> Self {
        Self {
            layer: layer.into(),
            srs: Crs::UTM_33N,
            bbox,
            width: DEFAULT_TILE_SIZE,
            height: DEFAULT_TILE_SIZE,
            format: DEFAULT_FORMAT.to_string(),
            transparent: true,
            version: WmsVersion::default(),
        }
    }

    /// Query-string parameters in the order they are sent
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let srs_key = match self.version {
            WmsVersion::V1_1_1 => "SRS",
            WmsVersion::V1_3_0 => "CRS",
        };

        // 1.3.0 follows the EPSG axis order, which is lat/lon for geographic systems
        let bbox = if self.version == WmsVersion::V1_3_0 && self.srs.is_geographic() {
            let b = &self.bbox;
            format!("{},{},{},{}", b.min_y, b.min_x, b.max_y, b.max_x)
        } else {
            self.bbox.to_bbox_param()
        };

        vec![
            ("SERVICE", "WMS".to_string()),
            ("VERSION", self.version.to_string()),
            ("REQUEST", "GetMap".to_string()),
            ("LAYERS", self.layer.clone()),
            ("STYLES", String::new()),
            (srs_key, self.srs.to_string()),
            ("BBOX", bbox),
            ("WIDTH", self.width.to_string()),
            ("HEIGHT", self.height.to_string()),
            ("FORMAT", self.format.clone()),
            ("TRANSPARENT", if self.transparent { "TRUE" } else { "FALSE" }.to_string()),
        ]
    }
}

/// Anything that can render a GetMap request to image bytes
pub trait MapService: Send + Sync {
    fn get_map(
        &self,
        request: &GetMapRequest,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// HTTP WMS endpoint
#[derive(Debug, Clone)]
pub struct WmsClient {
    http: reqwest::Client,
    base_url: String,
}

impl WmsClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl MapService for WmsClient {
    async fn get_map(&self, request: &GetMapRequest) -> anyhow::Result<Vec<u8>> {
        debug!(
            "GetMap {} layer={} bbox={}",
            self.base_url,
            request.layer,
            request.bbox.to_bbox_param()
        );

        let response = self
            .http
            .get(&self.base_url)
            .query(&request.query_pairs())
            .send()
            .await
            .with_context(|| format!("GetMap request to {} failed", self.base_url))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .context("Failed to read GetMap response body")?;

        if !status.is_success() {
            anyhow::bail!(
                "WMS returned HTTP {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            );
        }
        // Service exceptions come back as 200 with an XML document
        if content_type.contains("xml") {
            anyhow::bail!(
                "WMS service exception: {}",
                String::from_utf8_lossy(&body).trim()
            );
        }

        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(pairs: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn default_request_matches_tile_contract() {
        let bbox = TileBounds::new(500000.0, 4600000.0, 501000.0, 4601000.0);
        let pairs = GetMapRequest::new("ortho", bbox).query_pairs();

        assert_eq!(param(&pairs, "VERSION"), Some("1.1.1"));
        assert_eq!(param(&pairs, "REQUEST"), Some("GetMap"));
        assert_eq!(param(&pairs, "LAYERS"), Some("ortho"));
        assert_eq!(param(&pairs, "STYLES"), Some(""));
        assert_eq!(param(&pairs, "SRS"), Some("EPSG:32633"));
        assert_eq!(param(&pairs, "CRS"), None);
        assert_eq!(param(&pairs, "BBOX"), Some("500000,4600000,501000,4601000"));
        assert_eq!(param(&pairs, "WIDTH"), Some("1024"));
        assert_eq!(param(&pairs, "HEIGHT"), Some("1024"));
        assert_eq!(param(&pairs, "FORMAT"), Some("image/geotiff"));
        assert_eq!(param(&pairs, "TRANSPARENT"), Some("TRUE"));
    }

    #[test]
    fn version_1_3_0_uses_crs_and_latlon_axis_order() {
        let mut request = GetMapRequest::new("ortho", TileBounds::new(10.0, 45.0, 11.0, 46.0));
        request.version = WmsVersion::V1_3_0;
        request.srs = Crs::WGS84;

        let pairs = request.query_pairs();
        assert_eq!(param(&pairs, "CRS"), Some("EPSG:4326"));
        assert_eq!(param(&pairs, "SRS"), None);
        assert_eq!(param(&pairs, "BBOX"), Some("45,10,46,11"));

        request.srs = Crs::UTM_33N;
        assert_eq!(param(&request.query_pairs(), "BBOX"), Some("10,45,11,46"));
    }

    #[test]
    fn parses_versions() {
        assert_eq!("1.3.0".parse::<WmsVersion>().unwrap(), WmsVersion::V1_3_0);
        assert_eq!("1.1.1".parse::<WmsVersion>().unwrap(), WmsVersion::V1_1_1);
        assert!("2.0".parse::<WmsVersion>().is_err());
    }
}
