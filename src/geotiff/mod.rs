mod endian;
mod error;
mod geokeys;
mod ifd;
mod tag;

pub use endian::Endian;
pub use error::TiffError;
pub use geokeys::{GeoKey, GeoKeyDirectory, GeoKeyId, GeoKeyValue};
pub use ifd::Ifd;
pub use tag::{Tag, TagData, TagId, TagType};

use std::fmt::Display;
use std::io::{Read, Seek, SeekFrom};

const LITTLE_ENDIAN_MAGIC: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];
const BIG_ENDIAN_MAGIC: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];

/// A parsed classic TIFF: byte order plus the full IFD chain.
#[derive(Clone, Debug)]
pub struct Tiff {
    pub endian: Endian,
    pub ifds: Vec<Ifd>,
}

impl Tiff {
    pub fn open<R: Read + Seek>(stream: &mut R) -> Result<Self, TiffError> {
        stream.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        let endian = match magic {
            LITTLE_ENDIAN_MAGIC => Endian::Little,
            BIG_ENDIAN_MAGIC => Endian::Big,
            _ => return Err(TiffError::BadMagicBytes),
        };

        let mut ifds = vec![];
        let mut offset = endian.read::<4, u32>(stream)? as u64;
        while offset != 0 {
            let (ifd, next) = Ifd::parse(stream, offset, endian)?;
            ifds.push(ifd);
            offset = next;
        }
        if ifds.is_empty() {
            return Err(TiffError::NoIfd0);
        }

        Ok(Self { endian, ifds })
    }

    pub fn ifd0(&self) -> Result<&Ifd, TiffError> {
        self.ifds.first().ok_or(TiffError::NoIfd0)
    }
}

impl Display for Tiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tiff({:?} endian)", self.endian)?;
        for (i, ifd) in self.ifds.iter().enumerate() {
            writeln!(f, "  IFD {i}:")?;
            write!(f, "{ifd}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        assert!(matches!(
            Tiff::open(&mut cursor),
            Err(TiffError::BadMagicBytes)
        ));
    }

    #[test]
    fn reads_single_ifd_file() {
        let endian = Endian::Little;
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(64), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(32), endian);

        let (block_size, _) = ifd.encoded_size();
        let mut file = vec![0x49, 0x49, 0x2A, 0x00, 8, 0, 0, 0];
        file.extend(ifd.encode(endian, 8 + block_size as u64, 0));

        let mut cursor = Cursor::new(file);
        let tiff = Tiff::open(&mut cursor).unwrap();
        assert_eq!(tiff.ifds.len(), 1);
        let width: u32 = tiff.ifd0().unwrap().get_tag_value(TagId::ImageWidth).unwrap();
        assert_eq!(width, 64);
    }
}
