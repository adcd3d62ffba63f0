use super::Endian;
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use num_traits::NumCast;
use std::fmt::Display;

/// The tag codes this crate reads or writes. Anything else is carried
/// opaquely by its numeric code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum TagId {
    NewSubfileType = 0x00FE,
    ImageWidth = 0x0100,
    ImageHeight = 0x0101,
    BitsPerSample = 0x0102,
    Compression = 0x0103,
    PhotometricInterpretation = 0x0106,
    StripOffsets = 0x0111,
    SamplesPerPixel = 0x0115,
    RowsPerStrip = 0x0116,
    StripByteCounts = 0x0117,
    PlanarConfiguration = 0x011C,
    Predictor = 0x013D,
    TileWidth = 0x0142,
    TileLength = 0x0143,
    TileOffsets = 0x0144,
    TileByteCounts = 0x0145,
    SampleFormat = 0x0153,
    ModelPixelScale = 0x830E,
    ModelTiepoint = 0x8482,
    GeoKeyDirectory = 0x87AF,
    GeoDoubleParams = 0x87B0,
    GeoAsciiParams = 0x87B1,
    GdalNodata = 0xA481,
}

#[derive(Debug, PartialEq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum TagType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    Long8 = 16,

    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl TagType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            TagType::Byte | TagType::Ascii | TagType::SByte | TagType::Undefined => 1,
            TagType::Short | TagType::SShort => 2,
            TagType::Long | TagType::SLong | TagType::Float => 4,
            TagType::Rational | TagType::SRational | TagType::Double | TagType::Long8 => 8,
            TagType::Unknown => 1,
        }
    }
}

/// A parsed IFD entry: raw bytes plus enough typing to decode on demand.
#[derive(Clone, Debug)]
pub struct Tag {
    pub code: u16,
    pub datatype: TagType,
    pub count: usize,
    pub data: Vec<u8>,
    pub endian: Endian,
}

impl Tag {
    pub fn id(&self) -> Option<TagId> {
        TagId::try_from(self.code).ok()
    }

    /// Decode all values, coercing the stored type to `T`.
    pub fn values<T: NumCast>(&self) -> Option<Vec<T>> {
        let e = self.endian;
        match self.datatype {
            TagType::Byte | TagType::Undefined => coerce(e.decode_all::<1, u8>(&self.data)?),
            TagType::Ascii => coerce(e.decode_all::<1, u8>(&self.data)?),
            TagType::SByte => coerce(e.decode_all::<1, i8>(&self.data)?),
            TagType::Short => coerce(e.decode_all::<2, u16>(&self.data)?),
            TagType::SShort => coerce(e.decode_all::<2, i16>(&self.data)?),
            TagType::Long => coerce(e.decode_all::<4, u32>(&self.data)?),
            TagType::SLong => coerce(e.decode_all::<4, i32>(&self.data)?),
            TagType::Float => coerce(e.decode_all::<4, f32>(&self.data)?),
            TagType::Double => coerce(e.decode_all::<8, f64>(&self.data)?),
            TagType::Long8 => coerce(e.decode_all::<8, u64>(&self.data)?),
            _ => None,
        }
    }

    pub fn value<T: NumCast + Copy>(&self) -> Option<T> {
        self.values().and_then(|v: Vec<T>| v.first().copied())
    }

    pub fn as_string(&self) -> Option<String> {
        if self.datatype != TagType::Ascii {
            return None;
        }
        let s = String::from_utf8_lossy(&self.data);
        Some(s.trim_end_matches('\0').to_string())
    }
}

fn coerce<A: num_traits::ToPrimitive, T: NumCast>(values: Vec<A>) -> Option<Vec<T>> {
    values.into_iter().map(|v| T::from(v)).collect()
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_string = match self.id() {
            Some(id) => format!("{id:?}"),
            None => format!("Unknown({})", self.code),
        };
        write!(f, "{} {:?}[{}]", id_string, self.datatype, self.count)
    }
}

/// Typed tag payload for the write path.
#[derive(Clone, Debug)]
pub enum TagData {
    Byte(Vec<u8>),
    Ascii(Vec<u8>),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl TagData {
    /// Ascii payload with the nul terminator TIFF requires.
    pub fn from_string(s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Self::Ascii(bytes)
    }

    pub fn from_short(v: u16) -> Self {
        Self::Short(vec![v])
    }

    pub fn from_long(v: u32) -> Self {
        Self::Long(vec![v])
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Byte(v) => v.len(),
            Self::Ascii(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag_type(&self) -> TagType {
        match self {
            Self::Byte(_) => TagType::Byte,
            Self::Ascii(_) => TagType::Ascii,
            Self::Short(_) => TagType::Short,
            Self::Long(_) => TagType::Long,
            Self::Float(_) => TagType::Float,
            Self::Double(_) => TagType::Double,
        }
    }

    pub fn bytes(&self, endian: Endian) -> Vec<u8> {
        match self {
            Self::Byte(v) => endian.encode_all(v),
            Self::Ascii(v) => endian.encode_all(v),
            Self::Short(v) => endian.encode_all(v),
            Self::Long(v) => endian.encode_all(v),
            Self::Float(v) => endian.encode_all(v),
            Self::Double(v) => endian.encode_all(v),
        }
    }
}
