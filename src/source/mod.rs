//! Data source adapters.
//!
//! Each remote or local source implements [`SourceAdapter`]: `query` turns a
//! region into an ordered list of independently fetchable [`SourceQuery`]
//! chunks, `fetch` resolves one chunk into a [`RasterWindow`] tagged with the
//! source's true CRS and nodata value. Reprojection never happens here.

mod fs;
mod wcs;

pub use fs::GeoTiffSource;
pub use wcs::WcsSource;

use crate::cog::CogError;
use crate::geo::{BoundingBox, GeoError};
use crate::raster::RasterWindow;
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum SourceError {
    Unavailable(String),
    RateLimited,
    NoDataInRange,
    BadQuery(String),
    DecodeError(CogError),
    GeoError(GeoError),
    HttpError(reqwest::Error),
    IoError(io::Error),
}

impl SourceError {
    /// Transient failures worth another attempt with backoff.
    pub fn retryable(&self) -> bool {
        match self {
            SourceError::Unavailable(_) | SourceError::RateLimited => true,
            SourceError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for SourceError {}

impl From<CogError> for SourceError {
    fn from(e: CogError) -> Self {
        SourceError::DecodeError(e)
    }
}

impl From<GeoError> for SourceError {
    fn from(e: GeoError) -> Self {
        SourceError::GeoError(e)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::HttpError(e)
    }
}

impl From<io::Error> for SourceError {
    fn from(e: io::Error) -> Self {
        SourceError::IoError(e)
    }
}

/// Harvest time window, ISO 8601 dates.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Per-query parameters an adapter needs beyond the region itself.
#[derive(Clone, Debug)]
pub struct QueryParams {
    pub resolution: (f64, f64),
    pub time_range: Option<TimeRange>,
}

/// One fetchable chunk of a harvest. `index` is the enumeration order the
/// mosaicker's order-dependent policies rely on; the orchestrator reassigns
/// it globally after collecting queries from every source.
#[derive(Clone, Debug)]
pub struct SourceQuery {
    pub source_id: String,
    pub index: usize,
    pub bbox: BoundingBox,
    pub resolution: (f64, f64),
    pub layer: String,
    pub time_range: Option<TimeRange>,
}

impl std::fmt::Display for SourceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}] {}", self.source_id, self.index, self.bbox)
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Split a region into independently fetchable chunks. The region may be
    /// in any CRS; adapters transform it into their own.
    async fn query(
        &self,
        bbox: &BoundingBox,
        params: &QueryParams,
    ) -> Result<Vec<SourceQuery>, SourceError>;

    async fn fetch(&self, query: &SourceQuery) -> Result<RasterWindow, SourceError>;
}

/// Configured shape of one source, straight out of the JSON config.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Wcs {
        id: String,
        url: String,
        coverage: String,
        epsg: u16,
        #[serde(default = "default_max_pixels")]
        max_pixels_per_request: u64,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Geotiff {
        id: String,
        path: PathBuf,
    },
}

impl SourceSpec {
    pub fn id(&self) -> &str {
        match self {
            SourceSpec::Wcs { id, .. } => id,
            SourceSpec::Geotiff { id, .. } => id,
        }
    }
}

fn default_max_pixels() -> u64 {
    4_194_304 // 2048 x 2048 per request
}

fn default_timeout_secs() -> u64 {
    60
}

/// Build the adapter a spec names. The variant set is closed; an identifier
/// string in the config selects the variant via serde's tag.
pub fn create_source(spec: &SourceSpec) -> Result<Arc<dyn SourceAdapter>, SourceError> {
    match spec {
        SourceSpec::Wcs {
            id,
            url,
            coverage,
            epsg,
            max_pixels_per_request,
            timeout_secs,
        } => Ok(Arc::new(WcsSource::new(
            id.clone(),
            url.clone(),
            coverage.clone(),
            *epsg,
            *max_pixels_per_request,
            std::time::Duration::from_secs(*timeout_secs),
        )?)),
        SourceSpec::Geotiff { id, path } => {
            Ok(Arc::new(GeoTiffSource::new(id.clone(), path.clone())))
        }
    }
}
