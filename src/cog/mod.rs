//! Reading and writing cloud optimized GeoTIFFs.
//!
//! The reader accepts any classic GeoTIFF, tiled or stripped; strips are
//! treated as full width tiles so one windowed read path serves both. The
//! writer always produces a proper COG: little endian, directories up
//! front, internally tiled, overview levels after the full resolution IFD.

pub mod compression;
mod error;
mod writer;

pub use compression::{Compression, Predictor};
pub use error::CogError;
pub use writer::{CogSummary, CogWriter, OverviewResampling, TilingConfig};

use crate::geotiff::{Endian, GeoKeyDirectory, Ifd, TagId, Tiff};
use crate::raster::RasterWindow;
use num_enum::{FromPrimitive, IntoPrimitive};
use num_traits::NumCast;
use std::io::{Read, Seek, SeekFrom};

#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum SampleFormat {
    Unsigned = 1,
    Signed = 2,
    Float = 3,
    Undefined = 4,

    #[num_enum(default)]
    Unknown = 0x0000,
}

/// Chunk layout of one image: dimensions, sample encoding and the offset
/// table. Stripped files are normalized here to full width chunks.
#[derive(Clone, Debug)]
struct ImageLayout {
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    tiled: bool,
    bands: u32,
    bit_depth: usize,
    sample_format: SampleFormat,
    compression: Compression,
    predictor: Predictor,
    offsets: Vec<u64>,
    byte_counts: Vec<usize>,
}

impl ImageLayout {
    fn from_ifd(ifd: &Ifd) -> Result<Self, CogError> {
        let width: u32 = ifd.get_tag_value(TagId::ImageWidth)?;
        let height: u32 = ifd.get_tag_value(TagId::ImageHeight)?;
        let bands: u32 = ifd.get_tag_value(TagId::SamplesPerPixel).unwrap_or(1);

        let bit_depths: Vec<usize> = ifd
            .get_tag_values(TagId::BitsPerSample)
            .unwrap_or_else(|_| vec![8]);
        let bit_depth = bit_depths[0];
        if bit_depths.iter().any(|&d| d != bit_depth) {
            return Err(CogError::UnsupportedLayout(
                "mixed per band bit depths".to_string(),
            ));
        }

        let planar: u16 = ifd.get_tag_value(TagId::PlanarConfiguration).unwrap_or(1);
        if planar != 1 {
            return Err(CogError::UnsupportedLayout(
                "planar sample layout".to_string(),
            ));
        }

        let sample_format =
            SampleFormat::from(ifd.get_tag_value::<u16>(TagId::SampleFormat).unwrap_or(1));
        let compression =
            Compression::from(ifd.get_tag_value::<u16>(TagId::Compression).unwrap_or(1));
        let predictor = Predictor::from(ifd.get_tag_value::<u16>(TagId::Predictor).unwrap_or(1));

        let (chunk_width, chunk_height, tiled, offsets, byte_counts) =
            if ifd.has_tag(TagId::TileOffsets) {
                (
                    ifd.get_tag_value(TagId::TileWidth)?,
                    ifd.get_tag_value(TagId::TileLength)?,
                    true,
                    ifd.get_tag_values(TagId::TileOffsets)?,
                    ifd.get_tag_values(TagId::TileByteCounts)?,
                )
            } else {
                let rows_per_strip: u32 =
                    ifd.get_tag_value(TagId::RowsPerStrip).unwrap_or(height);
                (
                    width,
                    rows_per_strip,
                    false,
                    ifd.get_tag_values(TagId::StripOffsets)?,
                    ifd.get_tag_values(TagId::StripByteCounts)?,
                )
            };

        Ok(Self {
            width,
            height,
            chunk_width,
            chunk_height,
            tiled,
            bands,
            bit_depth,
            sample_format,
            compression,
            predictor,
            offsets,
            byte_counts,
        })
    }

    fn chunks_across(&self) -> u32 {
        (self.width + self.chunk_width - 1) / self.chunk_width
    }

    fn chunks_down(&self) -> u32 {
        (self.height + self.chunk_height - 1) / self.chunk_height
    }

    /// Pixel dimensions of the decoded chunk. Tiles are padded to full
    /// size; the last strip holds only the remaining rows.
    fn chunk_dimensions(&self, chunk_row: u32) -> (u32, u32) {
        let rows = if self.tiled {
            self.chunk_height
        } else {
            self.chunk_height
                .min(self.height - chunk_row * self.chunk_height)
        };
        (self.chunk_width, rows)
    }
}

/// Georeferencing of a raster as read from (or written to) a GeoTIFF.
#[derive(Clone, Copy, Debug)]
pub struct RasterGeo {
    pub epsg: u16,
    pub origin: (f64, f64),
    pub pixel_size: (f64, f64),
    pub nodata: f32,
}

impl RasterGeo {
    fn from_ifd(ifd: &Ifd) -> Result<Self, CogError> {
        let scale: Vec<f64> = ifd
            .get_tag_values(TagId::ModelPixelScale)
            .map_err(|_| CogError::MissingGeoreference)?;
        let tiepoint: Vec<f64> = ifd
            .get_tag_values(TagId::ModelTiepoint)
            .map_err(|_| CogError::MissingGeoreference)?;
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(CogError::MissingGeoreference);
        }
        let pixel_size = (scale[0], scale[1]);

        // Tiepoint maps raster point (i, j) to world point (x, y).
        let origin = (
            tiepoint[3] - tiepoint[0] * pixel_size.0,
            tiepoint[4] + tiepoint[1] * pixel_size.1,
        );

        let epsg = GeoKeyDirectory::parse(ifd)
            .ok()
            .and_then(|keys| keys.epsg())
            .ok_or(CogError::MissingGeoreference)?;

        let nodata = ifd
            .get_tag(TagId::GdalNodata)
            .ok()
            .and_then(|tag| tag.as_string())
            .and_then(|s| s.trim().parse::<f32>().ok())
            .unwrap_or(f32::NAN);

        Ok(Self {
            epsg,
            origin,
            pixel_size,
            nodata,
        })
    }
}

/// Windowed reader over a georeferenced TIFF stream.
pub struct CogReader<R: Read + Seek> {
    stream: R,
    endian: Endian,
    layout: ImageLayout,
    pub geo: RasterGeo,
}

impl<R: Read + Seek> CogReader<R> {
    pub fn open(mut stream: R) -> Result<Self, CogError> {
        let tiff = Tiff::open(&mut stream)?;
        let ifd0 = tiff.ifd0()?;
        let layout = ImageLayout::from_ifd(ifd0)?;
        let geo = RasterGeo::from_ifd(ifd0)?;
        Ok(Self {
            stream,
            endian: tiff.endian,
            layout,
            geo,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.layout.width, self.layout.height)
    }

    pub fn bands(&self) -> u32 {
        self.layout.bands
    }

    /// The full image in one window.
    pub fn read_all(&mut self) -> Result<RasterWindow, CogError> {
        let (width, height) = self.dimensions();
        self.read_window(0, 0, width, height)
    }

    /// A sub-rectangle of the full resolution image, in image pixel
    /// coordinates. The window must lie inside the image.
    pub fn read_window(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<RasterWindow, CogError> {
        if width == 0
            || height == 0
            || x0.checked_add(width).map_or(true, |x| x > self.layout.width)
            || y0.checked_add(height).map_or(true, |y| y > self.layout.height)
        {
            return Err(CogError::WindowOutOfBounds);
        }

        let bands = self.layout.bands;
        let geo = self.geo;
        let origin = (
            geo.origin.0 + x0 as f64 * geo.pixel_size.0,
            geo.origin.1 - y0 as f64 * geo.pixel_size.1,
        );
        let mut window = RasterWindow::new(
            width,
            height,
            bands,
            vec![geo.nodata; width as usize * height as usize * bands as usize],
            geo.epsg,
            origin,
            geo.pixel_size,
            geo.nodata,
        )?;

        let first_chunk_col = x0 / self.layout.chunk_width;
        let last_chunk_col = (x0 + width - 1) / self.layout.chunk_width;
        let first_chunk_row = y0 / self.layout.chunk_height;
        let last_chunk_row = (y0 + height - 1) / self.layout.chunk_height;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let samples = self.read_chunk(chunk_col, chunk_row)?;
                let (chunk_w, chunk_h) = self.layout.chunk_dimensions(chunk_row);
                let base_x = chunk_col * self.layout.chunk_width;
                let base_y = chunk_row * self.layout.chunk_height;

                for local_row in 0..chunk_h {
                    let image_y = base_y + local_row;
                    if image_y < y0 || image_y >= y0 + height {
                        continue;
                    }
                    for local_col in 0..chunk_w {
                        let image_x = base_x + local_col;
                        if image_x < x0 || image_x >= x0 + width || image_x >= self.layout.width {
                            continue;
                        }
                        let src = (local_row * chunk_w + local_col) as usize * bands as usize;
                        for band in 0..bands {
                            window.set(
                                image_x - x0,
                                image_y - y0,
                                band,
                                samples[src + band as usize],
                            );
                        }
                    }
                }
            }
        }

        Ok(window)
    }

    fn read_chunk(&mut self, chunk_col: u32, chunk_row: u32) -> Result<Vec<f32>, CogError> {
        let index = (chunk_row * self.layout.chunks_across() + chunk_col) as usize;
        if index >= self.layout.offsets.len() || index >= self.layout.byte_counts.len() {
            return Err(CogError::UnsupportedLayout(
                "offset table shorter than chunk grid".to_string(),
            ));
        }

        self.stream
            .seek(SeekFrom::Start(self.layout.offsets[index]))?;
        let mut compressed = vec![0u8; self.layout.byte_counts[index]];
        self.stream
            .read_exact(&mut compressed)
            .map_err(crate::geotiff::TiffError::from)?;

        let mut bytes = self.layout.compression.decode(&compressed)?;
        let (chunk_w, chunk_h) = self.layout.chunk_dimensions(chunk_row);
        self.layout.predictor.predict(
            &mut bytes,
            chunk_w as usize,
            self.layout.bit_depth,
            self.layout.bands as usize,
        )?;

        let samples = samples_to_f32(
            &bytes,
            self.endian,
            self.layout.sample_format,
            self.layout.bit_depth,
        )?;
        let expected = chunk_w as usize * chunk_h as usize * self.layout.bands as usize;
        if samples.len() < expected {
            return Err(CogError::UnsupportedLayout(format!(
                "chunk {index} decoded to {} samples, expected {expected}",
                samples.len()
            )));
        }
        Ok(samples)
    }
}

fn samples_to_f32(
    bytes: &[u8],
    endian: Endian,
    format: SampleFormat,
    bit_depth: usize,
) -> Result<Vec<f32>, CogError> {
    fn cast<const N: usize, T: eio::FromBytes<N> + NumCast>(
        bytes: &[u8],
        endian: Endian,
    ) -> Option<Vec<f32>> {
        endian
            .decode_all::<N, T>(bytes)?
            .into_iter()
            .map(|v| NumCast::from(v))
            .collect()
    }

    let samples = match (format, bit_depth) {
        (SampleFormat::Unsigned | SampleFormat::Undefined, 8) => cast::<1, u8>(bytes, endian),
        (SampleFormat::Unsigned | SampleFormat::Undefined, 16) => cast::<2, u16>(bytes, endian),
        (SampleFormat::Unsigned | SampleFormat::Undefined, 32) => cast::<4, u32>(bytes, endian),
        (SampleFormat::Signed, 8) => cast::<1, i8>(bytes, endian),
        (SampleFormat::Signed, 16) => cast::<2, i16>(bytes, endian),
        (SampleFormat::Signed, 32) => cast::<4, i32>(bytes, endian),
        (SampleFormat::Float, 32) => endian.decode_all::<4, f32>(bytes),
        (SampleFormat::Float, 64) => endian
            .decode_all::<8, f64>(bytes)
            .map(|v| v.into_iter().map(|d| d as f32).collect()),
        _ => {
            return Err(CogError::UnsupportedLayout(format!(
                "sample format {format:?} at {bit_depth} bits"
            )))
        }
    };
    samples.ok_or_else(|| {
        CogError::UnsupportedLayout("chunk byte count off sample boundary".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;
    use crate::geo::GridSpec;
    use std::io::Cursor;

    fn sample_window() -> RasterWindow {
        let bbox = BoundingBox::new(500_000.0, 4_000_000.0, 500_640.0, 4_000_640.0, 32610).unwrap();
        let grid = GridSpec::from_bbox(&bbox, (10.0, 10.0)).unwrap();
        let mut window = RasterWindow::filled(&grid, 1, -9999.0);
        for row in 0..window.height {
            for col in 0..window.width {
                window.set(col, row, 0, (row * window.width + col) as f32);
            }
        }
        window
    }

    #[test]
    fn write_then_read_full_image() {
        let window = sample_window();
        let writer = CogWriter::new(TilingConfig {
            tile_size: 32,
            ..TilingConfig::default()
        });
        let bytes = writer.assemble(&window).unwrap();

        let mut reader = CogReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.dimensions(), (64, 64));
        assert_eq!(reader.geo.epsg, 32610);
        assert_eq!(reader.geo.pixel_size, (10.0, 10.0));
        assert_eq!(reader.geo.nodata, -9999.0);

        let back = reader.read_all().unwrap();
        assert_eq!(back.buffer, window.buffer);
        assert_eq!(back.origin, window.origin);
    }

    #[test]
    fn windowed_read_matches_full_read() {
        let window = sample_window();
        let writer = CogWriter::new(TilingConfig {
            tile_size: 32,
            compression: Compression::Uncompressed,
            ..TilingConfig::default()
        });
        let bytes = writer.assemble(&window).unwrap();

        let mut reader = CogReader::open(Cursor::new(bytes)).unwrap();
        // A window straddling all four tiles.
        let sub = reader.read_window(20, 24, 30, 20).unwrap();
        assert_eq!((sub.width, sub.height), (30, 20));
        for row in 0..sub.height {
            for col in 0..sub.width {
                assert_eq!(
                    sub.get(col, row, 0),
                    window.get(col + 20, row + 24, 0),
                    "mismatch at ({col}, {row})"
                );
            }
        }
        assert_eq!(sub.origin, (500_200.0, 4_000_400.0));
    }

    #[test]
    fn truncated_chunk_is_an_error_not_a_panic() {
        use crate::geotiff::TagData;

        // Single 32x32 uncompressed tile, so the byte count sits inline.
        let bbox = BoundingBox::new(0.0, 0.0, 320.0, 320.0, 32610).unwrap();
        let grid = GridSpec::from_bbox(&bbox, (10.0, 10.0)).unwrap();
        let window = RasterWindow::filled(&grid, 1, -9999.0);
        let writer = CogWriter::new(TilingConfig {
            tile_size: 32,
            compression: Compression::Uncompressed,
            ..TilingConfig::default()
        });
        let mut bytes = writer.assemble(&window).unwrap();

        // Claim half the tile's real size, as a corrupt remote payload would.
        let mut cursor = Cursor::new(&bytes);
        let mut tiff = Tiff::open(&mut cursor).unwrap();
        let ifd = &mut tiff.ifds[0];
        ifd.set_tag(TagId::TileByteCounts, TagData::Long(vec![2048]), Endian::Little);
        let (block, _) = ifd.encoded_size();
        let patched = ifd.encode(Endian::Little, 8 + block as u64, 0);
        bytes[8..8 + patched.len()].copy_from_slice(&patched);

        let mut reader = CogReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.read_all(),
            Err(CogError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn out_of_bounds_window_is_rejected() {
        let window = sample_window();
        let writer = CogWriter::new(TilingConfig::default());
        let bytes = writer.assemble(&window).unwrap();
        let mut reader = CogReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.read_window(60, 0, 10, 10),
            Err(CogError::WindowOutOfBounds)
        ));
        assert!(matches!(
            reader.read_window(0, 0, 0, 10),
            Err(CogError::WindowOutOfBounds)
        ));
    }
}
