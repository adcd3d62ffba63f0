use super::{CogError, Compression};
use crate::geo::Crs;
use crate::geotiff::{Endian, GeoKeyDirectory, Ifd, TagData, TagId};
use crate::raster::RasterWindow;
use rayon::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

const HEADER_SIZE: u64 = 8;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PLANAR_CHUNKY: u16 = 1;
const SAMPLE_FORMAT_FLOAT: u16 = 3;
const SUBFILE_REDUCED_IMAGE: u32 = 1;

/// How each overview level condenses a 2x2 block of the level above.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverviewResampling {
    #[default]
    MeanOfValid,
    Nearest,
}

/// Output layout knobs for [`CogWriter`].
///
/// `overview_levels: None` builds the pyramid until the image fits one
/// tile; `Some(n)` caps it at n levels.
#[derive(Clone, Copy, Debug)]
pub struct TilingConfig {
    pub tile_size: u32,
    pub compression: Compression,
    pub overview_levels: Option<u32>,
    pub overview_resampling: OverviewResampling,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            compression: Compression::DeflateAdobe,
            overview_levels: None,
            overview_resampling: OverviewResampling::MeanOfValid,
        }
    }
}

/// What `write` actually put on disk.
#[derive(Clone, Copy, Debug)]
pub struct CogSummary {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
    pub overview_count: u32,
    pub bytes_written: u64,
}

struct EncodedLevel {
    ifd: Ifd,
    tiles: Vec<Vec<u8>>,
}

/// Assembles and writes cloud optimized GeoTIFFs.
///
/// The whole file is laid out in memory first: header, the full IFD chain
/// (full resolution, then each overview), then tile data in the same order.
/// Nothing touches disk until assembly succeeds, and a failed disk write
/// removes the partial file.
pub struct CogWriter {
    config: TilingConfig,
}

impl CogWriter {
    pub fn new(config: TilingConfig) -> Self {
        Self { config }
    }

    pub fn write(&self, path: &Path, window: &RasterWindow) -> Result<CogSummary, CogError> {
        let (bytes, level_count) = self.assemble_counted(window)?;
        debug!(
            path = %path.display(),
            size = bytes.len(),
            "writing cog"
        );
        match File::create(path).and_then(|mut file| file.write_all(&bytes)) {
            Ok(()) => Ok(CogSummary {
                width: window.width,
                height: window.height,
                bands: window.bands,
                overview_count: level_count as u32 - 1,
                bytes_written: bytes.len() as u64,
            }),
            Err(e) => {
                let _ = std::fs::remove_file(path);
                Err(e.into())
            }
        }
    }

    /// Serialize `window` as a complete COG byte stream.
    pub fn assemble(&self, window: &RasterWindow) -> Result<Vec<u8>, CogError> {
        Ok(self.assemble_counted(window)?.0)
    }

    fn assemble_counted(&self, window: &RasterWindow) -> Result<(Vec<u8>, usize), CogError> {
        let endian = Endian::Little;
        let crs = Crs::from_epsg(window.epsg)?;

        // Overviews halve until the image fits in a single tile, or until
        // the configured level cap.
        let mut levels = vec![self.encode_level(window, endian, true, &crs)?];
        let mut previous: Option<RasterWindow> = None;
        loop {
            if let Some(cap) = self.config.overview_levels {
                if levels.len() as u32 > cap {
                    break;
                }
            }
            let source = previous.as_ref().unwrap_or(window);
            if source.width.max(source.height) <= self.config.tile_size {
                break;
            }
            let overview = match downsample_half(source, self.config.overview_resampling) {
                Some(overview) => overview,
                None => break,
            };
            levels.push(self.encode_level(&overview, endian, false, &crs)?);
            previous = Some(overview);
        }

        // First pass sized every IFD with a placeholder offset table, so the
        // directory region is fixed and tile offsets can be resolved.
        let mut ifd_starts = Vec::with_capacity(levels.len());
        let mut offset = HEADER_SIZE;
        for level in &levels {
            let (block, external) = level.ifd.encoded_size();
            ifd_starts.push(offset);
            offset += (block + external) as u64;
        }

        let mut tile_offsets: Vec<Vec<u32>> = Vec::with_capacity(levels.len());
        for level in &levels {
            let offsets = level
                .tiles
                .iter()
                .map(|tile| {
                    let at = offset as u32;
                    offset += tile.len() as u64;
                    at
                })
                .collect();
            tile_offsets.push(offsets);
        }
        check_classic_offset(offset)?;

        let mut bytes = Vec::with_capacity(offset as usize);
        bytes.extend([0x49, 0x49, 0x2A, 0x00]);
        bytes.extend(endian.encode(HEADER_SIZE as u32));
        for (i, level) in levels.iter_mut().enumerate() {
            level
                .ifd
                .set_tag(TagId::TileOffsets, TagData::Long(tile_offsets[i].clone()), endian);
            let (block, _) = level.ifd.encoded_size();
            let next = if i + 1 < ifd_starts.len() {
                ifd_starts[i + 1] as u32
            } else {
                0
            };
            bytes.extend(level.ifd.encode(endian, ifd_starts[i] + block as u64, next));
        }
        for level in &levels {
            for tile in &level.tiles {
                bytes.extend_from_slice(tile);
            }
        }

        Ok((bytes, levels.len()))
    }

    fn encode_level(
        &self,
        window: &RasterWindow,
        endian: Endian,
        full_resolution: bool,
        crs: &Crs,
    ) -> Result<EncodedLevel, CogError> {
        let tile_size = self.config.tile_size;
        let tiles_across = (window.width + tile_size - 1) / tile_size;
        let tiles_down = (window.height + tile_size - 1) / tile_size;

        let raw_tiles: Vec<Vec<f32>> = (0..tiles_down * tiles_across)
            .map(|index| {
                let tile_col = index % tiles_across;
                let tile_row = index / tiles_across;
                extract_tile(window, tile_col * tile_size, tile_row * tile_size, tile_size)
            })
            .collect();

        let tiles: Vec<Vec<u8>> = raw_tiles
            .par_iter()
            .map(|samples| {
                let bytes = endian.encode_all(samples);
                self.config.compression.encode(&bytes)
            })
            .collect::<Result<_, _>>()?;

        let byte_counts: Vec<u32> = tiles.iter().map(|t| t.len() as u32).collect();
        let bands = window.bands as usize;

        let mut ifd = Ifd::default();
        if !full_resolution {
            ifd.set_tag(
                TagId::NewSubfileType,
                TagData::from_long(SUBFILE_REDUCED_IMAGE),
                endian,
            );
        }
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(window.width), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(window.height), endian);
        ifd.set_tag(TagId::BitsPerSample, TagData::Short(vec![32; bands]), endian);
        ifd.set_tag(
            TagId::Compression,
            TagData::from_short(self.config.compression.into()),
            endian,
        );
        ifd.set_tag(
            TagId::PhotometricInterpretation,
            TagData::from_short(PHOTOMETRIC_MIN_IS_BLACK),
            endian,
        );
        ifd.set_tag(
            TagId::SamplesPerPixel,
            TagData::from_short(window.bands as u16),
            endian,
        );
        ifd.set_tag(
            TagId::PlanarConfiguration,
            TagData::from_short(PLANAR_CHUNKY),
            endian,
        );
        ifd.set_tag(TagId::TileWidth, TagData::from_short(tile_size as u16), endian);
        ifd.set_tag(TagId::TileLength, TagData::from_short(tile_size as u16), endian);
        ifd.set_tag(
            TagId::TileOffsets,
            TagData::Long(vec![0; tiles.len()]),
            endian,
        );
        ifd.set_tag(TagId::TileByteCounts, TagData::Long(byte_counts), endian);
        ifd.set_tag(
            TagId::SampleFormat,
            TagData::Short(vec![SAMPLE_FORMAT_FLOAT; bands]),
            endian,
        );
        ifd.set_tag(
            TagId::GdalNodata,
            TagData::from_string(&format_nodata(window.nodata)),
            endian,
        );

        if full_resolution {
            ifd.set_tag(
                TagId::ModelPixelScale,
                TagData::Double(vec![window.pixel_size.0, window.pixel_size.1, 0.0]),
                endian,
            );
            ifd.set_tag(
                TagId::ModelTiepoint,
                TagData::Double(vec![0.0, 0.0, 0.0, window.origin.0, window.origin.1, 0.0]),
                endian,
            );
            GeoKeyDirectory::for_epsg(window.epsg, crs.is_geographic())
                .add_to_ifd(&mut ifd, endian);
        }

        Ok(EncodedLevel { ifd, tiles })
    }
}

/// One padded tile, band interleaved, nodata beyond the image edge.
fn extract_tile(window: &RasterWindow, x0: u32, y0: u32, tile_size: u32) -> Vec<f32> {
    let bands = window.bands;
    let mut samples =
        vec![window.nodata; tile_size as usize * tile_size as usize * bands as usize];
    let rows = tile_size.min(window.height.saturating_sub(y0));
    let cols = tile_size.min(window.width.saturating_sub(x0));
    for row in 0..rows {
        for col in 0..cols {
            for band in 0..bands {
                if let Some(value) = window.get(x0 + col, y0 + row, band) {
                    let i = ((row * tile_size + col) * bands + band) as usize;
                    samples[i] = value;
                }
            }
        }
    }
    samples
}

/// Half resolution overview per the configured rule, or None once the
/// image no longer shrinks.
fn downsample_half(
    window: &RasterWindow,
    resampling: OverviewResampling,
) -> Option<RasterWindow> {
    let width = (window.width + 1) / 2;
    let height = (window.height + 1) / 2;
    if width == window.width && height == window.height {
        return None;
    }
    if width < 2 || height < 2 {
        return None;
    }

    let mut out = RasterWindow {
        width,
        height,
        bands: window.bands,
        buffer: vec![window.nodata; width as usize * height as usize * window.bands as usize],
        epsg: window.epsg,
        origin: window.origin,
        pixel_size: (window.pixel_size.0 * 2.0, window.pixel_size.1 * 2.0),
        nodata: window.nodata,
    };

    for row in 0..height {
        for col in 0..width {
            for band in 0..window.bands {
                match resampling {
                    OverviewResampling::MeanOfValid => {
                        let mut sum = 0.0;
                        let mut count = 0u32;
                        for dy in 0..2 {
                            for dx in 0..2 {
                                if let Some(v) = window.get(col * 2 + dx, row * 2 + dy, band) {
                                    if !window.is_nodata(v) {
                                        sum += v;
                                        count += 1;
                                    }
                                }
                            }
                        }
                        if count > 0 {
                            out.set(col, row, band, sum / count as f32);
                        }
                    }
                    OverviewResampling::Nearest => {
                        if let Some(v) = window.get(col * 2, row * 2, band) {
                            if !window.is_nodata(v) {
                                out.set(col, row, band, v);
                            }
                        }
                    }
                }
            }
        }
    }
    Some(out)
}

/// Classic TIFF stores offsets as u32; anything past 4 GiB cannot be
/// addressed and must be rejected rather than silently wrapped.
fn check_classic_offset(offset: u64) -> Result<(), CogError> {
    if offset > u32::MAX as u64 {
        return Err(CogError::UnsupportedLayout(format!(
            "assembled size {offset} exceeds the classic TIFF 4 GiB offset limit"
        )));
    }
    Ok(())
}

fn format_nodata(nodata: f32) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        nodata.to_string()
    }
}
