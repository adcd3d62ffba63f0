//! Harvest run configuration, loaded from a JSON file.

use crate::geo::{BoundingBox, GeoError};
use crate::mask::{InclusionRule, MaskMode};
use crate::mosaic::ConflictPolicy;
use crate::reproject::Resampling;
use crate::source::{SourceSpec, TimeRange};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    GeoError(GeoError),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::JsonError(e)
    }
}

impl From<GeoError> for ConfigError {
    fn from(e: GeoError) -> Self {
        ConfigError::GeoError(e)
    }
}

/// Output resolution: one number for square pixels, a pair otherwise.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(untagged)]
pub enum Resolution {
    Square(f64),
    Pair(f64, f64),
}

impl Resolution {
    pub fn as_pair(&self) -> (f64, f64) {
        match *self {
            Resolution::Square(r) => (r, r),
            Resolution::Pair(x, y) => (x, y),
        }
    }
}

/// Mask reference: a GeoJSON file on disk or inline geometry.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum MaskSpec {
    Path { path: PathBuf },
    Inline { geometry: serde_json::Value },
}

/// Whether masking runs on each reprojected window or on the mosaic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStage {
    PreMosaic,
    PostMosaic,
}

/// Output compression choice exposed in the config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionOption {
    None,
    Deflate,
}

impl CompressionOption {
    pub fn codec(&self) -> crate::cog::Compression {
        match self {
            CompressionOption::None => crate::cog::Compression::Uncompressed,
            CompressionOption::Deflate => crate::cog::Compression::DeflateAdobe,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HarvestOptions {
    pub resampling: Resampling,
    pub conflict_policy: ConflictPolicy,
    pub mask_mode: MaskMode,
    pub inclusion_rule: InclusionRule,
    pub mask_stage: MaskStage,
    pub tile_size: u32,
    pub overview_levels: Option<u32>,
    pub compression: CompressionOption,
    pub concurrency: usize,
    pub retry_limit: u32,
    pub retry_backoff_ms: u64,
    pub failure_threshold: f64,
    pub buffer: f64,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            resampling: Resampling::Bilinear,
            conflict_policy: ConflictPolicy::FirstWins,
            mask_mode: MaskMode::SetNodataOutside,
            inclusion_rule: InclusionRule::AllTouched,
            mask_stage: MaskStage::PostMosaic,
            tile_size: 512,
            overview_levels: None,
            compression: CompressionOption::Deflate,
            concurrency: 4,
            retry_limit: 3,
            retry_backoff_ms: 500,
            failure_threshold: 0.5,
            buffer: 0.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HarvestConfig {
    pub bbox: [f64; 4],
    pub crs: String,
    pub resolution: Resolution,
    pub sources: Vec<SourceSpec>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub mask: Option<MaskSpec>,
    #[serde(default)]
    pub options: HarvestOptions,
}

impl HarvestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: HarvestConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Pre-flight validation; a config that passes here can start the
    /// pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.region()?;
        let (rx, ry) = self.resolution.as_pair();
        if !(rx > 0.0 && ry > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "resolution must be positive, got ({rx}, {ry})"
            )));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no sources configured".to_string()));
        }
        if !(0.0..=1.0).contains(&self.options.failure_threshold) {
            return Err(ConfigError::Invalid(format!(
                "failure_threshold must be within [0, 1], got {}",
                self.options.failure_threshold
            )));
        }
        if self.options.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if let Some(range) = &self.time_range {
            for date in [&range.start, &range.end] {
                if !is_iso_date(date) {
                    return Err(ConfigError::Invalid(format!(
                        "time_range dates must be YYYY-MM-DD, got {date:?}"
                    )));
                }
            }
            if range.end < range.start {
                return Err(ConfigError::Invalid(format!(
                    "time_range ends ({}) before it starts ({})",
                    range.end, range.start
                )));
            }
        }
        Ok(())
    }

    /// The harvest region, buffered if requested.
    pub fn region(&self) -> Result<BoundingBox, ConfigError> {
        let epsg = parse_epsg(&self.crs)?;
        let [min_x, min_y, max_x, max_y] = self.bbox;
        let bbox = BoundingBox::new(min_x, min_y, max_x, max_y, epsg)?;
        if self.options.buffer > 0.0 {
            Ok(bbox.buffered(self.options.buffer))
        } else {
            Ok(bbox)
        }
    }
}

// Sources take dates verbatim, so only the shape is checked here. ISO
// ordering makes the end-before-start comparison a plain string compare.
fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

/// Accept "EPSG:4326" (any case) or a bare code.
pub fn parse_epsg(crs: &str) -> Result<u16, ConfigError> {
    let trimmed = crs.trim();
    let code = match trimmed.split_once(':') {
        Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
        Some(_) => {
            return Err(ConfigError::Invalid(format!(
                "unsupported CRS authority in {crs:?}"
            )))
        }
        None => trimmed,
    };
    code.parse::<u16>()
        .map_err(|_| ConfigError::Invalid(format!("unparseable CRS {crs:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config_json() -> &'static str {
        r#"{
            "bbox": [140.0, -35.0, 141.0, -34.0],
            "crs": "EPSG:4326",
            "resolution": 0.001,
            "output_path": "/tmp/out.tif",
            "time_range": {"start": "2020-01-01", "end": "2020-12-31"},
            "sources": [
                {
                    "kind": "wcs",
                    "id": "dem",
                    "url": "https://example.com/wcs",
                    "coverage": "elevation",
                    "epsg": 4326
                }
            ],
            "mask": {"path": "/tmp/mask.geojson"},
            "options": {
                "resampling": "cubic",
                "conflict_policy": "mean_of_valid",
                "mask_mode": "multiply",
                "inclusion_rule": "centroid",
                "mask_stage": "pre_mosaic",
                "tile_size": 256,
                "compression": "none",
                "retry_limit": 5
            }
        }"#
    }

    #[test]
    fn full_config_parses() {
        let config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.resolution.as_pair(), (0.001, 0.001));
        assert_eq!(config.options.resampling, Resampling::Cubic);
        assert_eq!(config.options.conflict_policy, ConflictPolicy::MeanOfValid);
        assert_eq!(config.options.mask_stage, MaskStage::PreMosaic);
        assert_eq!(config.options.retry_limit, 5);
        // Unset options keep their defaults.
        assert_eq!(config.options.concurrency, 4);
        assert!(matches!(config.mask, Some(MaskSpec::Path { .. })));
        assert_eq!(config.region().unwrap().epsg, 4326);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let json = r#"{
            "bbox": [0.0, 0.0, 2.0, 2.0],
            "crs": "3857",
            "resolution": [1.0, 2.0],
            "output_path": "/tmp/out.tif",
            "sources": [{"kind": "geotiff", "id": "cache", "path": "/tmp/in.tif"}]
        }"#;
        let config: HarvestConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.resolution.as_pair(), (1.0, 2.0));
        assert_eq!(config.options.tile_size, 512);
        assert!(config.mask.is_none());
        assert!(config.time_range.is_none());
    }

    #[test]
    fn epsg_parsing_variants() {
        assert_eq!(parse_epsg("EPSG:4326").unwrap(), 4326);
        assert_eq!(parse_epsg("epsg:3857").unwrap(), 3857);
        assert_eq!(parse_epsg("28355").unwrap(), 28355);
        assert!(parse_epsg("ESRI:102030").is_err());
        assert!(parse_epsg("not-a-code").is_err());
    }

    #[test]
    fn validation_catches_bad_input() {
        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.bbox = [1.0, 0.0, 0.0, 1.0];
        assert!(config.validate().is_err());

        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.sources.clear();
        assert!(config.validate().is_err());

        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.options.failure_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.time_range = Some(TimeRange {
            start: "01/01/2020".to_string(),
            end: "2020-12-31".to_string(),
        });
        assert!(config.validate().is_err());

        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.time_range = Some(TimeRange {
            start: "2021-01-01".to_string(),
            end: "2020-12-31".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_expands_region() {
        let mut config: HarvestConfig = serde_json::from_str(full_config_json()).unwrap();
        config.options.buffer = 0.5;
        let region = config.region().unwrap();
        assert_eq!(region.min_x, 139.5);
        assert_eq!(region.max_y, -33.5);
    }
}
