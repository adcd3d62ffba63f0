use super::compression::CompressionError;
use crate::geo::GeoError;
use crate::geotiff::TiffError;
use crate::raster::RasterError;
use std::io;

#[derive(Debug)]
pub enum CogError {
    TiffError(TiffError),
    RasterError(RasterError),
    CompressionError(CompressionError),
    GeoError(GeoError),
    MissingGeoreference,
    UnsupportedLayout(String),
    WindowOutOfBounds,
    IoError(io::Error),
}

impl std::fmt::Display for CogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for CogError {}

impl From<TiffError> for CogError {
    fn from(e: TiffError) -> Self {
        CogError::TiffError(e)
    }
}

impl From<RasterError> for CogError {
    fn from(e: RasterError) -> Self {
        CogError::RasterError(e)
    }
}

impl From<CompressionError> for CogError {
    fn from(e: CompressionError) -> Self {
        CogError::CompressionError(e)
    }
}

impl From<GeoError> for CogError {
    fn from(e: GeoError) -> Self {
        CogError::GeoError(e)
    }
}

impl From<io::Error> for CogError {
    fn from(e: io::Error) -> Self {
        CogError::IoError(e)
    }
}
