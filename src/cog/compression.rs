// https://en.wikipedia.org/wiki/TIFF#TIFF_Compression_Tag

use num_enum::{FromPrimitive, IntoPrimitive};
use salzweg::decoder::{DecodingError, TiffStyleDecoder};
use std::io::{self, Read};

#[derive(Debug)]
pub enum CompressionError {
    LzwError(DecodingError),
    DecodeNotSupported(Compression),
    EncodeNotSupported(Compression),
    PredictorNotSupported(Predictor),
    IoError(io::Error),
}

impl From<io::Error> for CompressionError {
    fn from(e: io::Error) -> Self {
        CompressionError::IoError(e)
    }
}

impl std::fmt::Display for CompressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for CompressionError {}

#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Compression {
    Uncompressed = 1,
    Lzw = 5,
    Jpeg = 7,
    DeflateAdobe = 8,
    PackBits = 32773,
    Deflate = 32946,
    Lerc = 34887,
    Zstd = 34926,
    WebP = 34927,

    #[num_enum(default)]
    Unknown = 0x0000,
}

impl Compression {
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Self::Uncompressed => Ok(bytes.to_vec()),
            Self::Lzw => {
                TiffStyleDecoder::decode_to_vec(bytes).map_err(CompressionError::LzwError)
            }
            Self::DeflateAdobe | Self::Deflate => {
                let mut buf = vec![];
                flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut buf)?;
                Ok(buf)
            }
            other => Err(CompressionError::DecodeNotSupported(*other)),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Self::Uncompressed => Ok(bytes.to_vec()),
            Self::DeflateAdobe | Self::Deflate => {
                let mut buf = vec![];
                flate2::read::ZlibEncoder::new(bytes, flate2::Compression::default())
                    .read_to_end(&mut buf)?;
                Ok(buf)
            }
            other => Err(CompressionError::EncodeNotSupported(*other)),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Predictor {
    No = 1,
    Horizontal = 2,
    FloatingPoint = 3,

    #[num_enum(default)]
    Unknown = 0x0000,
}

impl Predictor {
    pub fn predict(
        &self,
        buffer: &mut [u8],
        width: usize,
        bit_depth: usize,
        samples_per_pixel: usize,
    ) -> Result<(), CompressionError> {
        match self {
            Self::No => {}
            Self::Horizontal => {
                if bit_depth != 8 {
                    return Err(CompressionError::PredictorNotSupported(*self));
                }
                let row_bytes = width * samples_per_pixel;
                for i in 0..buffer.len() {
                    if i % row_bytes < samples_per_pixel {
                        continue;
                    }
                    buffer[i] = buffer[i].wrapping_add(buffer[i - samples_per_pixel]);
                }
            }
            other => return Err(CompressionError::PredictorNotSupported(*other)),
        }
        Ok(())
    }
}
