use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use tiff::decoder::Decoder;
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use super::{Crs, GeoTransform, crs_from_geokeys, geokeys_for};

/// Georeferencing of a raster without its pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterHeader {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
}

impl RasterHeader {
    /// Read the header of a GeoTIFF file on disk
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open raster {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read georeferencing from {}", path.display()))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut decoder = Decoder::new(reader).context("Not a TIFF image")?;
        let (width, height) = decoder.dimensions()?;

        let transform = match decoder.find_tag(Tag::ModelTransformationTag)? {
            Some(matrix) => GeoTransform::from_model_transformation(&matrix.into_f64_vec()?)?,
            None => {
                let tiepoint = decoder
                    .find_tag(Tag::ModelTiepointTag)?
                    .context("GeoTIFF has neither ModelTransformationTag nor ModelTiepointTag")?
                    .into_f64_vec()?;
                let scale = decoder
                    .find_tag(Tag::ModelPixelScaleTag)?
                    .context("GeoTIFF has a tie point but no ModelPixelScaleTag")?
                    .into_f64_vec()?;
                GeoTransform::from_tiepoint(&tiepoint, &scale)?
            }
        };

        let crs = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
            Some(keys) => crs_from_geokeys(&keys.into_u16_vec()?),
            None => None,
        };

        Ok(Self {
            width,
            height,
            transform,
            crs,
        })
    }
}

/// In-memory raster with its georeferencing
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub image: DynamicImage,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
}

impl GeoRaster {
    pub fn new(image: DynamicImage, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self {
            image,
            transform,
            crs,
        }
    }

    /// Decode a GeoTIFF held in memory (e.g. a WMS response body)
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let header = RasterHeader::from_reader(Cursor::new(bytes))?;
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Tiff)
            .context("Failed to decode GeoTIFF pixels")?;

        if (image.width(), image.height()) != (header.width, header.height) {
            anyhow::bail!(
                "GeoTIFF header says {}x{} but pixels decode to {}x{}",
                header.width,
                header.height,
                image.width(),
                image.height()
            );
        }

        Ok(Self::new(image, header.transform, header.crs))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read raster {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Invalid GeoTIFF {}", path.display()))
    }

    pub fn header(&self) -> RasterHeader {
        RasterHeader {
            width: self.image.width(),
            height: self.image.height(),
            transform: self.transform,
            crs: self.crs,
        }
    }

    /// Write to `path` as an uncompressed GeoTIFF
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create raster {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .with_context(|| format!("Failed to write raster {}", path.display()))?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_to(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> anyhow::Result<()> {
        let mut encoder = TiffEncoder::new(writer)?;
        let (width, height) = (self.image.width(), self.image.height());

        match &self.image {
            DynamicImage::ImageLuma8(gray) => {
                let mut image = encoder.new_image::<colortype::Gray8>(width, height)?;
                self.write_geotags(image.encoder())?;
                image.write_data(gray.as_raw())?;
            }
            img if img.color().has_alpha() => {
                let rgba = img.to_rgba8();
                let mut image = encoder.new_image::<colortype::RGBA8>(width, height)?;
                self.write_geotags(image.encoder())?;
                image.write_data(rgba.as_raw())?;
            }
            img => {
                let rgb = img.to_rgb8();
                let mut image = encoder.new_image::<colortype::RGB8>(width, height)?;
                self.write_geotags(image.encoder())?;
                image.write_data(rgb.as_raw())?;
            }
        }

        Ok(())
    }

    fn write_geotags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        directory: &mut tiff::encoder::DirectoryEncoder<'_, W, K>,
    ) -> anyhow::Result<()> {
        match self.transform.pixel_scale() {
            Some((sx, sy)) => {
                let scale = [sx, sy, 0.0];
                let tiepoint = [0.0, 0.0, 0.0, self.transform.c, self.transform.f, 0.0];
                directory.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
                directory.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
            }
            None => {
                let matrix = self.transform.to_model_transformation();
                directory.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
            }
        }

        let keys = geokeys_for(self.crs);
        directory.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
        Ok(())
    }
}
