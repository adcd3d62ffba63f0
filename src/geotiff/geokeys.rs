// GeoKey directory handling per OGC GeoTIFF 1.1
// https://docs.ogc.org/is/19-008r4/19-008r4.html

use super::{Endian, Ifd, TagData, TagId, TagType, TiffError};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::Display;

#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum GeoKeyId {
    GTModelType = 1024,
    GTRasterType = 1025,
    GTCitation = 1026,
    GeographicType = 2048,
    GeogCitation = 2049,
    GeogAngularUnits = 2054,
    ProjectedCSType = 3072,
    ProjLinearUnits = 3076,
}

pub const MODEL_TYPE_PROJECTED: u16 = 1;
pub const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub const RASTER_TYPE_PIXEL_IS_AREA: u16 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum GeoKeyValue {
    Short(Vec<u16>),
    Ascii(String),
    Double(Vec<f64>),
    Undefined,
}

impl GeoKeyValue {
    pub fn as_number<T: num_traits::NumCast>(&self) -> Option<T> {
        match self {
            GeoKeyValue::Short(v) if v.len() == 1 => T::from(v[0]),
            GeoKeyValue::Double(v) if v.len() == 1 => T::from(v[0]),
            _ => None,
        }
    }
}

impl Display for GeoKeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoKeyValue::Short(v) => write!(f, "{v:?}"),
            GeoKeyValue::Ascii(s) => write!(f, "{s}"),
            GeoKeyValue::Double(v) => write!(f, "{v:?}"),
            GeoKeyValue::Undefined => write!(f, "Undefined"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeoKey {
    pub code: u16,
    pub value: GeoKeyValue,
}

impl GeoKey {
    pub fn id(&self) -> Option<GeoKeyId> {
        GeoKeyId::try_from(self.code).ok()
    }
}

/// The parsed (or to-be-written) GeoKey directory of one GeoTIFF.
#[derive(Clone, Debug)]
pub struct GeoKeyDirectory {
    pub version: u16,
    pub revision: (u16, u16),
    pub keys: Vec<GeoKey>,
}

impl GeoKeyDirectory {
    pub fn new() -> Self {
        Self {
            version: 1,
            revision: (1, 0),
            keys: vec![],
        }
    }

    /// The minimal self-describing directory for a raster on an EPSG CRS:
    /// model type, pixel-is-area raster type, and the CS type key.
    pub fn for_epsg(epsg: u16, geographic: bool) -> Self {
        let mut directory = Self::new();
        let model = if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        };
        directory.set_key(GeoKeyId::GTModelType, GeoKeyValue::Short(vec![model]));
        directory.set_key(
            GeoKeyId::GTRasterType,
            GeoKeyValue::Short(vec![RASTER_TYPE_PIXEL_IS_AREA]),
        );
        let cs_key = if geographic {
            GeoKeyId::GeographicType
        } else {
            GeoKeyId::ProjectedCSType
        };
        directory.set_key(cs_key, GeoKeyValue::Short(vec![epsg]));
        directory
    }

    pub fn set_key(&mut self, id: GeoKeyId, value: GeoKeyValue) {
        let code: u16 = id.into();
        let key = GeoKey { code, value };
        if let Some(index) = self.keys.iter().position(|k| k.code == code) {
            self.keys[index] = key;
        } else {
            self.keys.push(key);
        }
    }

    pub fn get_key(&self, id: GeoKeyId) -> Option<&GeoKeyValue> {
        let code: u16 = id.into();
        self.keys.iter().find(|k| k.code == code).map(|k| &k.value)
    }

    /// The EPSG code of the raster, from whichever CS type key is present.
    pub fn epsg(&self) -> Option<u16> {
        self.get_key(GeoKeyId::ProjectedCSType)
            .or_else(|| self.get_key(GeoKeyId::GeographicType))
            .and_then(|value| value.as_number())
    }

    pub fn parse(ifd: &Ifd) -> Result<Self, TiffError> {
        let directory_values: Vec<u16> = ifd.get_tag_values(TagId::GeoKeyDirectory)?;
        if directory_values.len() < 4 {
            return Err(TiffError::BadTag(TagId::GeoKeyDirectory));
        }

        let version = directory_values[0];
        let revision = (directory_values[1], directory_values[2]);
        let key_count = directory_values[3] as usize;
        if directory_values.len() < 4 + key_count * 4 {
            return Err(TiffError::BadTag(TagId::GeoKeyDirectory));
        }

        let keys = (0..key_count)
            .map(|i| {
                let entry = (i + 1) * 4;
                let code = directory_values[entry];
                let location = directory_values[entry + 1];
                let count = directory_values[entry + 2] as usize;
                let offset = directory_values[entry + 3] as usize;

                let value = if location == 0 {
                    GeoKeyValue::Short(vec![directory_values[entry + 3]])
                } else {
                    let tag = ifd.0.iter().find(|tag| tag.code == location);
                    tag.and_then(|tag| match tag.datatype {
                        TagType::Ascii => tag.as_string().map(|s| {
                            let end = (offset + count).min(s.len());
                            GeoKeyValue::Ascii(
                                s[offset.min(s.len())..end]
                                    .trim_end_matches(['|', '\0'])
                                    .to_string(),
                            )
                        }),
                        TagType::Short => tag.values().and_then(|v: Vec<u16>| {
                            v.get(offset..offset + count)
                                .map(|s| GeoKeyValue::Short(s.to_vec()))
                        }),
                        TagType::Double => tag.values().and_then(|v: Vec<f64>| {
                            v.get(offset..offset + count)
                                .map(|s| GeoKeyValue::Double(s.to_vec()))
                        }),
                        _ => None,
                    })
                    .unwrap_or(GeoKeyValue::Undefined)
                };

                GeoKey { code, value }
            })
            .collect();

        Ok(Self {
            version,
            revision,
            keys,
        })
    }

    pub fn add_to_ifd(&self, ifd: &mut Ifd, endian: Endian) {
        let (key_directory, ascii_params, double_params) = self.unparse();
        ifd.set_tag(TagId::GeoKeyDirectory, TagData::Short(key_directory), endian);
        if !ascii_params.is_empty() {
            ifd.set_tag(TagId::GeoAsciiParams, TagData::Ascii(ascii_params), endian);
        }
        if !double_params.is_empty() {
            ifd.set_tag(TagId::GeoDoubleParams, TagData::Double(double_params), endian);
        }
    }

    fn unparse(&self) -> (Vec<u16>, Vec<u8>, Vec<f64>) {
        let mut directory = vec![
            self.version,
            self.revision.0,
            self.revision.1,
            self.keys.len() as u16,
        ];
        let mut asciis: Vec<u8> = vec![];
        let mut doubles: Vec<f64> = vec![];

        for key in &self.keys {
            directory.push(key.code);
            match &key.value {
                GeoKeyValue::Short(v) if v.len() == 1 => {
                    directory.extend([0, 1, v[0]]);
                }
                GeoKeyValue::Short(_) | GeoKeyValue::Undefined => {
                    directory.extend([0, 0, 0]);
                }
                GeoKeyValue::Ascii(s) => {
                    directory.push(TagId::GeoAsciiParams.into());
                    directory.push(s.len() as u16 + 1);
                    directory.push(asciis.len() as u16);
                    asciis.extend(s.bytes());
                    asciis.push(b'|');
                }
                GeoKeyValue::Double(v) => {
                    directory.push(TagId::GeoDoubleParams.into());
                    directory.push(v.len() as u16);
                    directory.push(doubles.len() as u16);
                    doubles.extend(v);
                }
            }
        }

        (directory, asciis, doubles)
    }
}

impl Default for GeoKeyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for GeoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{id:?}: {}", self.value),
            None => write!(f, "0x{:04X}: {}", self.code, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_directory_round_trip() {
        let endian = Endian::Little;
        let directory = GeoKeyDirectory::for_epsg(32610, false);
        assert_eq!(directory.epsg(), Some(32610));

        let mut ifd = Ifd::default();
        directory.add_to_ifd(&mut ifd, endian);
        let parsed = GeoKeyDirectory::parse(&ifd).unwrap();
        assert_eq!(parsed.epsg(), Some(32610));
        assert_eq!(
            parsed.get_key(GeoKeyId::GTModelType),
            Some(&GeoKeyValue::Short(vec![MODEL_TYPE_PROJECTED]))
        );
    }

    #[test]
    fn out_of_range_value_offsets_become_undefined() {
        let endian = Endian::Little;
        let mut ifd = Ifd::default();
        // One key claiming 4 doubles at offset 10, while the referenced
        // params tag holds a single value.
        let directory = vec![1u16, 1, 0, 1, 2054, TagId::GeoDoubleParams.into(), 4, 10];
        ifd.set_tag(TagId::GeoKeyDirectory, TagData::Short(directory), endian);
        ifd.set_tag(TagId::GeoDoubleParams, TagData::Double(vec![0.017453]), endian);

        let parsed = GeoKeyDirectory::parse(&ifd).unwrap();
        assert_eq!(parsed.keys.len(), 1);
        assert_eq!(parsed.keys[0].value, GeoKeyValue::Undefined);
    }

    #[test]
    fn geographic_directory_uses_geographic_key() {
        let directory = GeoKeyDirectory::for_epsg(4326, true);
        assert_eq!(directory.epsg(), Some(4326));
        assert_eq!(
            directory.get_key(GeoKeyId::GTModelType),
            Some(&GeoKeyValue::Short(vec![MODEL_TYPE_GEOGRAPHIC]))
        );
        assert!(directory.get_key(GeoKeyId::ProjectedCSType).is_none());
    }
}
