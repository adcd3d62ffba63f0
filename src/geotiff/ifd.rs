use super::{Endian, Tag, TagData, TagId, TagType, TiffError};
use std::io::{self, Read, Seek, SeekFrom};

/// One image file directory: an ordered set of tags.
///
/// The same type backs both directions: parsed from a stream when reading,
/// assembled with [`Ifd::set_tag`] and serialized with [`Ifd::encode`] when
/// writing.
#[derive(Clone, Debug, Default)]
pub struct Ifd(pub Vec<Tag>);

/// Entry block layout constants for classic little/big endian TIFF.
const ENTRY_SIZE: usize = 12;
const INLINE_VALUE_SIZE: usize = 4;

impl Ifd {
    pub fn parse<R: Read + Seek>(
        stream: &mut R,
        offset: u64,
        endian: Endian,
    ) -> io::Result<(Ifd, u64)> {
        stream.seek(SeekFrom::Start(offset))?;

        let tag_count = endian.read::<2, u16>(stream)? as usize;

        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            let code = endian.read(stream)?;
            let datatype: TagType = endian.read::<2, u16>(stream)?.into();
            let count = endian.read::<4, u32>(stream)? as usize;

            let data_size = count * datatype.size_in_bytes();
            let mut data: Vec<u8> = vec![0; data_size.max(INLINE_VALUE_SIZE)];

            if data_size > INLINE_VALUE_SIZE {
                let data_offset: u32 = endian.read(stream)?;
                let pos = stream.stream_position()?;
                stream.seek(SeekFrom::Start(data_offset as u64))?;
                stream.read_exact(&mut data)?;
                stream.seek(SeekFrom::Start(pos))?;
            } else {
                stream.read_exact(&mut data)?;
                data.truncate(data_size);
            }

            tags.push(Tag {
                code,
                datatype,
                endian,
                count,
                data,
            });
        }

        let next_ifd_offset: u32 = endian.read(stream)?;

        Ok((Ifd(tags), next_ifd_offset as u64))
    }

    pub fn get_tag(&self, id: TagId) -> Result<&Tag, TiffError> {
        let code: u16 = id.into();
        self.0
            .iter()
            .find(|tag| tag.code == code)
            .ok_or(TiffError::MissingTag(id))
    }

    pub fn has_tag(&self, id: TagId) -> bool {
        self.get_tag(id).is_ok()
    }

    pub fn get_tag_values<T: num_traits::NumCast>(&self, id: TagId) -> Result<Vec<T>, TiffError> {
        self.get_tag(id)?.values().ok_or(TiffError::BadTag(id))
    }

    pub fn get_tag_value<T: num_traits::NumCast + Copy>(&self, id: TagId) -> Result<T, TiffError> {
        self.get_tag(id)?.value().ok_or(TiffError::BadTag(id))
    }

    /// Insert or replace a tag, keeping entries sorted by code as the TIFF
    /// spec requires.
    pub fn set_tag(&mut self, id: TagId, data: TagData, endian: Endian) {
        let code: u16 = id.into();
        let tag = Tag {
            code,
            datatype: data.tag_type(),
            count: data.len(),
            data: data.bytes(endian),
            endian,
        };
        match self.0.binary_search_by_key(&code, |t| t.code) {
            Ok(index) => self.0[index] = tag,
            Err(index) => self.0.insert(index, tag),
        }
    }

    /// Size of the serialized entry block (count header, entries, next-IFD
    /// pointer) and of the external data area for values over 4 bytes.
    pub fn encoded_size(&self) -> (usize, usize) {
        let block = 2 + self.0.len() * ENTRY_SIZE + 4;
        let external = self
            .0
            .iter()
            .map(|tag| {
                let size = tag.data.len();
                if size > INLINE_VALUE_SIZE {
                    size + size % 2
                } else {
                    0
                }
            })
            .sum();
        (block, external)
    }

    /// Serialize this IFD. `external_offset` is the absolute file offset
    /// where this IFD's external values will land; `next_ifd_offset` is 0
    /// for the last directory. Returns the entry block followed by the
    /// external data area.
    pub fn encode(&self, endian: Endian, external_offset: u64, next_ifd_offset: u32) -> Vec<u8> {
        let (block_size, external_size) = self.encoded_size();
        let mut block = Vec::with_capacity(block_size);
        let mut external = Vec::with_capacity(external_size);

        block.extend(endian.encode(self.0.len() as u16));
        for tag in &self.0 {
            block.extend(endian.encode(tag.code));
            block.extend(endian.encode::<2, u16>(tag.datatype.into()));
            block.extend(endian.encode(tag.count as u32));
            if tag.data.len() > INLINE_VALUE_SIZE {
                let offset = external_offset + external.len() as u64;
                block.extend(endian.encode(offset as u32));
                external.extend_from_slice(&tag.data);
                if tag.data.len() % 2 == 1 {
                    external.push(0); // word alignment
                }
            } else {
                let mut inline = tag.data.clone();
                inline.resize(INLINE_VALUE_SIZE, 0);
                block.extend(inline);
            }
        }
        block.extend(endian.encode(next_ifd_offset));

        block.extend(external);
        block
    }
}

impl std::fmt::Display for Ifd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for tag in &self.0 {
            writeln!(f, "\t{tag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn set_tag_keeps_codes_sorted() {
        let endian = Endian::Little;
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::TileWidth, TagData::from_short(512), endian);
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(1024), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(768), endian);
        let codes: Vec<u16> = ifd.0.iter().map(|t| t.code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);

        // Replacement keeps a single entry.
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(2048), endian);
        assert_eq!(ifd.0.len(), 3);
        assert_eq!(ifd.get_tag_value::<u32>(TagId::ImageWidth).unwrap(), 2048);
    }

    #[test]
    fn encode_parse_round_trip() {
        let endian = Endian::Little;
        let mut ifd = Ifd::default();
        ifd.set_tag(TagId::ImageWidth, TagData::from_long(7), endian);
        ifd.set_tag(TagId::ImageHeight, TagData::from_long(5), endian);
        ifd.set_tag(TagId::BitsPerSample, TagData::Short(vec![32, 32, 32]), endian);
        ifd.set_tag(
            TagId::ModelPixelScale,
            TagData::Double(vec![10.0, 10.0, 0.0]),
            endian,
        );
        ifd.set_tag(TagId::GdalNodata, TagData::from_string("-9999"), endian);

        // Serialize after an 8 byte header, externals right after the block.
        let (block_size, _) = ifd.encoded_size();
        let encoded = ifd.encode(endian, 8 + block_size as u64, 0);
        let mut file = vec![b'I', b'I', 42, 0, 8, 0, 0, 0];
        file.extend(encoded);

        let mut cursor = Cursor::new(file);
        let (parsed, next) = Ifd::parse(&mut cursor, 8, endian).unwrap();
        assert_eq!(next, 0);
        assert_eq!(parsed.get_tag_value::<u32>(TagId::ImageWidth).unwrap(), 7);
        assert_eq!(
            parsed.get_tag_values::<u16>(TagId::BitsPerSample).unwrap(),
            vec![32, 32, 32]
        );
        assert_eq!(
            parsed.get_tag_values::<f64>(TagId::ModelPixelScale).unwrap(),
            vec![10.0, 10.0, 0.0]
        );
        assert_eq!(
            parsed.get_tag(TagId::GdalNodata).unwrap().as_string().unwrap(),
            "-9999"
        );
    }
}
