//! Per-query provenance records and the sidecar JSON.

use crate::geo::BoundingBox;
use crate::source::SourceQuery;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Fetched { valid_pixels: usize },
    NoData,
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryRecord {
    pub source_id: String,
    pub index: usize,
    pub bbox: [f64; 4],
    pub epsg: u16,
    pub attempts: u32,
    pub outcome: QueryOutcome,
}

impl QueryRecord {
    pub fn new(query: &SourceQuery, attempts: u32, outcome: QueryOutcome) -> Self {
        let BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
            epsg,
        } = query.bbox;
        Self {
            source_id: query.source_id.clone(),
            index: query.index,
            bbox: [min_x, min_y, max_x, max_y],
            epsg,
            attempts,
            outcome,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Failed { .. })
    }
}

/// Everything a reader needs to judge how complete the output raster is.
#[derive(Clone, Debug, Serialize)]
pub struct Provenance {
    pub generated_unix: u64,
    pub output_epsg: u16,
    pub queries: Vec<QueryRecord>,
}

impl Provenance {
    pub fn new(output_epsg: u16, queries: Vec<QueryRecord>) -> Self {
        let generated_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            generated_unix,
            output_epsg,
            queries,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.queries.iter().filter(|q| q.failed()).count()
    }
}

/// Sidecar path next to the output COG: `out.tif` -> `out.tif.provenance.json`.
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".provenance.json");
    PathBuf::from(name)
}
