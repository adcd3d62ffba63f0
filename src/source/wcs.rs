//! WCS 1.0.0 GetCoverage adapter.
//!
//! Speaks the subset of WCS that national elevation / soil grid services
//! expose: GET GetCoverage with a bbox, an output resolution and
//! `format=GeoTIFF`. Responses are decoded with the crate's own GeoTIFF
//! reader, so stripped and tiled server output both work.

use super::{QueryParams, SourceAdapter, SourceError, SourceQuery};
use crate::cog::CogReader;
use crate::geo::BoundingBox;
use crate::raster::RasterWindow;
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

pub struct WcsSource {
    id: String,
    client: reqwest::Client,
    url: String,
    coverage: String,
    epsg: u16,
    max_pixels_per_request: u64,
}

impl WcsSource {
    pub fn new(
        id: String,
        url: String,
        coverage: String,
        epsg: u16,
        max_pixels_per_request: u64,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            client,
            url,
            coverage,
            epsg,
            max_pixels_per_request: max_pixels_per_request.max(1),
        })
    }

    fn request_params(&self, query: &SourceQuery) -> Vec<(String, String)> {
        let bbox = &query.bbox;
        let mut params = vec![
            ("service".to_string(), "WCS".to_string()),
            ("version".to_string(), "1.0.0".to_string()),
            ("request".to_string(), "GetCoverage".to_string()),
            ("coverage".to_string(), query.layer.clone()),
            (
                "bbox".to_string(),
                format!("{},{},{},{}", bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y),
            ),
            ("crs".to_string(), format!("EPSG:{}", bbox.epsg)),
            ("resx".to_string(), query.resolution.0.to_string()),
            ("resy".to_string(), query.resolution.1.to_string()),
            ("format".to_string(), "GeoTIFF".to_string()),
        ];
        if let Some(range) = &query.time_range {
            params.push(("time".to_string(), format!("{}/{}", range.start, range.end)));
        }
        params
    }
}

#[async_trait]
impl SourceAdapter for WcsSource {
    fn id(&self) -> &str {
        &self.id
    }

    /// Chunk the region so no single GetCoverage exceeds the per-request
    /// pixel budget. Chunks enumerate row major from the top-left.
    async fn query(
        &self,
        bbox: &BoundingBox,
        params: &QueryParams,
    ) -> Result<Vec<SourceQuery>, SourceError> {
        let bbox = bbox.to_crs(self.epsg)?;
        let resolution = params.resolution;
        if resolution.0 <= 0.0 || resolution.1 <= 0.0 {
            return Err(SourceError::BadQuery(format!(
                "non-positive resolution {resolution:?}"
            )));
        }

        let side = (self.max_pixels_per_request as f64).sqrt().floor().max(1.0);
        let chunk_width = side * resolution.0;
        let chunk_height = side * resolution.1;
        let cols = (bbox.width() / chunk_width).ceil().max(1.0) as u64;
        let rows = (bbox.height() / chunk_height).ceil().max(1.0) as u64;

        let mut queries = vec![];
        for row in 0..rows {
            for col in 0..cols {
                let min_x = bbox.min_x + col as f64 * chunk_width;
                let max_x = (min_x + chunk_width).min(bbox.max_x);
                let max_y = bbox.max_y - row as f64 * chunk_height;
                let min_y = (max_y - chunk_height).max(bbox.min_y);
                if max_x <= min_x || max_y <= min_y {
                    continue;
                }
                queries.push(SourceQuery {
                    source_id: self.id.clone(),
                    index: queries.len(),
                    bbox: BoundingBox::new(min_x, min_y, max_x, max_y, self.epsg)?,
                    resolution,
                    layer: self.coverage.clone(),
                    time_range: params.time_range.clone(),
                });
            }
        }
        debug!(source = %self.id, chunks = queries.len(), "wcs query planned");
        Ok(queries)
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<RasterWindow, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.request_params(query))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SourceError::Unavailable(format!("http {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(SourceError::BadQuery(format!("http {}", status.as_u16())));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(SourceError::NoDataInRange);
        }
        if body.starts_with(b"<?xml") || body.starts_with(b"<Service") {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(200)]).to_string();
            return Err(SourceError::Unavailable(snippet));
        }

        let mut reader = CogReader::open(Cursor::new(body.to_vec()))?;
        let window = reader.read_all()?;
        if window.is_empty() {
            return Err(SourceError::NoDataInRange);
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TimeRange;

    fn source(max_pixels: u64) -> WcsSource {
        WcsSource::new(
            "dem".to_string(),
            "https://example.com/wcs".to_string(),
            "elevation".to_string(),
            4326,
            max_pixels,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn params() -> QueryParams {
        QueryParams {
            resolution: (0.001, 0.001),
            time_range: None,
        }
    }

    #[tokio::test]
    async fn small_region_is_one_chunk() {
        let bbox = BoundingBox::new(140.0, -35.0, 140.1, -34.9, 4326).unwrap();
        let queries = source(4_194_304).query(&bbox, &params()).await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].bbox, bbox);
        assert_eq!(queries[0].layer, "elevation");
    }

    #[tokio::test]
    async fn large_region_chunks_cover_it() {
        // 400x400 pixels against a 100x100 pixel budget -> 4x4 chunks.
        let bbox = BoundingBox::new(140.0, -35.0, 140.4, -34.6, 4326).unwrap();
        let queries = source(10_000).query(&bbox, &params()).await.unwrap();
        assert_eq!(queries.len(), 16);

        for (i, q) in queries.iter().enumerate() {
            assert_eq!(q.index, i);
            assert!(q.bbox.min_x >= bbox.min_x - 1e-9);
            assert!(q.bbox.max_x <= bbox.max_x + 1e-9);
            assert!(q.bbox.min_y >= bbox.min_y - 1e-9);
            assert!(q.bbox.max_y <= bbox.max_y + 1e-9);
        }
        // Chunks tile the region without gaps.
        let area: f64 = queries.iter().map(|q| q.bbox.width() * q.bbox.height()).sum();
        assert!((area - bbox.width() * bbox.height()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn request_params_follow_wcs_1_0_0() {
        let source = source(4_194_304);
        let bbox = BoundingBox::new(140.0, -35.0, 140.1, -34.9, 4326).unwrap();
        let query_params = QueryParams {
            resolution: (0.001, 0.001),
            time_range: Some(TimeRange {
                start: "2020-01-01".to_string(),
                end: "2020-12-31".to_string(),
            }),
        };
        let queries = source.query(&bbox, &query_params).await.unwrap();
        let request = source.request_params(&queries[0]);

        let get = |key: &str| {
            request
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("service"), Some("WCS"));
        assert_eq!(get("version"), Some("1.0.0"));
        assert_eq!(get("request"), Some("GetCoverage"));
        assert_eq!(get("coverage"), Some("elevation"));
        assert_eq!(get("bbox"), Some("140,-35,140.1,-34.9"));
        assert_eq!(get("crs"), Some("EPSG:4326"));
        assert_eq!(get("format"), Some("GeoTIFF"));
        assert_eq!(get("time"), Some("2020-01-01/2020-12-31"));
    }
}
