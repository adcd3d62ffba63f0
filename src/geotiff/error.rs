use super::TagId;
use std::io;

#[derive(Debug)]
pub enum TiffError {
    BadMagicBytes,
    MissingTag(TagId),
    BadTag(TagId),
    NoIfd0,
    ReadError(io::Error),
}

impl std::fmt::Display for TiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TiffError {}

impl From<io::Error> for TiffError {
    fn from(e: io::Error) -> Self {
        TiffError::ReadError(e)
    }
}
