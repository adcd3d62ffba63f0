//! Local GeoTIFF adapter: serves harvests from files already on disk,
//! reading only the tiles that overlap the requested region.

use super::{QueryParams, SourceAdapter, SourceError, SourceQuery};
use crate::cog::CogReader;
use crate::geo::BoundingBox;
use crate::raster::RasterWindow;
use async_trait::async_trait;
use std::fs::File;
use std::path::PathBuf;
use tracing::debug;

pub struct GeoTiffSource {
    id: String,
    path: PathBuf,
}

impl GeoTiffSource {
    pub fn new(id: String, path: PathBuf) -> Self {
        Self { id, path }
    }

    fn open_blocking(path: &PathBuf) -> Result<CogReader<File>, SourceError> {
        Ok(CogReader::open(File::open(path)?)?)
    }

    fn file_bounds(reader: &CogReader<File>) -> Result<BoundingBox, SourceError> {
        let (width, height) = reader.dimensions();
        let geo = reader.geo;
        Ok(BoundingBox::new(
            geo.origin.0,
            geo.origin.1 - height as f64 * geo.pixel_size.1,
            geo.origin.0 + width as f64 * geo.pixel_size.0,
            geo.origin.1,
            geo.epsg,
        )?)
    }
}

#[async_trait]
impl SourceAdapter for GeoTiffSource {
    fn id(&self) -> &str {
        &self.id
    }

    /// One query covering the intersection of the request with the file
    /// extent, in the file's CRS. A disjoint region yields no queries.
    async fn query(
        &self,
        bbox: &BoundingBox,
        _params: &QueryParams,
    ) -> Result<Vec<SourceQuery>, SourceError> {
        let path = self.path.clone();
        let bbox = *bbox;
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let reader = Self::open_blocking(&path)?;
            let bounds = Self::file_bounds(&reader)?;
            let request = bbox.to_crs(bounds.epsg)?;
            match request.intersection(&bounds) {
                Some(clipped) => Ok(vec![SourceQuery {
                    source_id: id,
                    index: 0,
                    bbox: clipped,
                    resolution: reader.geo.pixel_size,
                    layer: String::new(),
                    time_range: None,
                }]),
                None => {
                    debug!(source = %id, "request disjoint from file extent");
                    Ok(vec![])
                }
            }
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("blocking read: {e}")))?
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<RasterWindow, SourceError> {
        let path = self.path.clone();
        let bbox = query.bbox;
        tokio::task::spawn_blocking(move || {
            let mut reader = Self::open_blocking(&path)?;
            let (width, height) = reader.dimensions();
            let geo = reader.geo;

            let col0 = ((bbox.min_x - geo.origin.0) / geo.pixel_size.0).floor().max(0.0) as u32;
            let row0 = ((geo.origin.1 - bbox.max_y) / geo.pixel_size.1).floor().max(0.0) as u32;
            let col1 = (((bbox.max_x - geo.origin.0) / geo.pixel_size.0).ceil() as u32).min(width);
            let row1 = (((geo.origin.1 - bbox.min_y) / geo.pixel_size.1).ceil() as u32).min(height);
            if col1 <= col0 || row1 <= row0 {
                return Err(SourceError::NoDataInRange);
            }

            let window = reader.read_window(col0, row0, col1 - col0, row1 - row0)?;
            if window.is_empty() {
                return Err(SourceError::NoDataInRange);
            }
            Ok(window)
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("blocking read: {e}")))?
    }
}
