//! Harvest orchestration: config in, COG plus provenance sidecar out.
//!
//! The run is a fixed data-flow: plan queries per source, fetch them with
//! bounded concurrency and per-query retries, restore enumeration order,
//! reproject, mosaic, mask, write. Per-query failures become provenance
//! records instead of aborting, up to a configurable failure fraction.
//! Cancellation is cooperative and guarantees zero files at the
//! destination.

mod config;
mod provenance;

pub use config::{
    parse_epsg, CompressionOption, ConfigError, HarvestConfig, HarvestOptions, MaskSpec,
    MaskStage, Resolution,
};
pub use provenance::{sidecar_path, Provenance, QueryOutcome, QueryRecord};

use crate::cog::{CogError, CogWriter, TilingConfig};
use crate::geo::{GeoError, GridSpec};
use crate::mask::{self, load_geojson_file, mask_from_geojson, MaskCache, MaskError};
use crate::mosaic::merge;
use crate::raster::RasterWindow;
use crate::reproject::reproject;
use crate::source::{
    create_source, QueryParams, SourceAdapter, SourceError, SourceQuery,
};
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
pub enum HarvestError {
    ConfigError(ConfigError),
    GeoError(GeoError),
    SourceError(SourceError),
    MaskError(MaskError),
    WriteFailure(CogError),
    JsonError(serde_json::Error),
    IoError(io::Error),
    TaskFailure(String),
    TooManyFailures { failed: usize, total: usize },
    Cancelled,
}

impl std::fmt::Display for HarvestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for HarvestError {}

impl From<ConfigError> for HarvestError {
    fn from(e: ConfigError) -> Self {
        HarvestError::ConfigError(e)
    }
}

impl From<GeoError> for HarvestError {
    fn from(e: GeoError) -> Self {
        HarvestError::GeoError(e)
    }
}

impl From<SourceError> for HarvestError {
    fn from(e: SourceError) -> Self {
        HarvestError::SourceError(e)
    }
}

impl From<MaskError> for HarvestError {
    fn from(e: MaskError) -> Self {
        HarvestError::MaskError(e)
    }
}

impl From<CogError> for HarvestError {
    fn from(e: CogError) -> Self {
        HarvestError::WriteFailure(e)
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(e: serde_json::Error) -> Self {
        HarvestError::JsonError(e)
    }
}

impl From<io::Error> for HarvestError {
    fn from(e: io::Error) -> Self {
        HarvestError::IoError(e)
    }
}

/// `Partial` means the output has gaps from failed queries. It is never
/// collapsed into `Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    Complete,
    Partial,
}

#[derive(Debug)]
pub struct HarvestResult {
    pub path: PathBuf,
    pub sidecar_path: PathBuf,
    pub grid: GridSpec,
    pub status: HarvestStatus,
    pub provenance: Provenance,
}

pub struct Harvester {
    config: HarvestConfig,
    sources: Vec<Arc<dyn SourceAdapter>>,
    mask_cache: Arc<MaskCache>,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Result<Self, HarvestError> {
        let sources = config
            .sources
            .iter()
            .map(create_source)
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_sources(config, sources)
    }

    /// Build against pre-constructed adapters. The config still provides
    /// the region, grid and policies.
    pub fn with_sources(
        config: HarvestConfig,
        sources: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            config,
            sources,
            mask_cache: Arc::new(MaskCache::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Token for cooperative cancellation. Cancelling abandons in-flight
    /// fetches and leaves no files at the destination.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<HarvestResult, HarvestError> {
        let options = self.config.options.clone();
        let region = self.config.region()?;
        let resolution = self.config.resolution.as_pair();
        let grid = GridSpec::from_bbox(&region, resolution)?;
        info!(%grid, %region, "starting harvest");

        // Resolve the mask up front so a bad reference fails before any
        // network traffic.
        let mask = match &self.config.mask {
            Some(MaskSpec::Path { path }) => Some((
                path.display().to_string(),
                load_geojson_file(path)?,
            )),
            Some(MaskSpec::Inline { geometry }) => {
                Some(("inline".to_string(), mask_from_geojson(geometry)?))
            }
            None => None,
        };
        let mask_raster = match &mask {
            Some((name, mask)) => {
                let key = MaskCache::key(name, &grid, options.inclusion_rule);
                Some(
                    self.mask_cache
                        .get_or_rasterize(&key, mask, &grid, options.inclusion_rule)
                        .await?,
                )
            }
            None => None,
        };

        // Plan: per-source chunk lists, flattened in source order with a
        // global enumeration index.
        let params = QueryParams {
            resolution,
            time_range: self.config.time_range.clone(),
        };
        let mut planned: Vec<(Arc<dyn SourceAdapter>, SourceQuery)> = vec![];
        for source in &self.sources {
            for mut query in source.query(&region, &params).await? {
                query.index = planned.len();
                planned.push((source.clone(), query));
            }
        }
        info!(queries = planned.len(), "harvest planned");

        // Fetch concurrently but collect in spawn order, so order-dependent
        // mosaic policies see the enumeration order, not completion order.
        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        let mut handles = Vec::with_capacity(planned.len());
        for (adapter, query) in &planned {
            let adapter = adapter.clone();
            let query = query.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let retry_limit = options.retry_limit;
            let backoff = Duration::from_millis(options.retry_backoff_ms);
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            query,
                            0,
                            Err(SourceError::Unavailable("semaphore closed".to_string())),
                        )
                    }
                };
                fetch_with_retry(adapter, query, retry_limit, backoff, cancel).await
            }));
        }

        let mut fetched = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            fetched.push(joined.map_err(|e| HarvestError::TaskFailure(e.to_string()))?);
        }
        if self.cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        let mut records: Vec<QueryRecord> = Vec::with_capacity(fetched.len());
        let mut windows: Vec<(usize, RasterWindow)> = vec![];
        for (query, attempts, result) in fetched {
            match result {
                Ok(window) => {
                    records.push(QueryRecord::new(
                        &query,
                        attempts,
                        QueryOutcome::Fetched {
                            valid_pixels: window.valid_pixels(),
                        },
                    ));
                    windows.push((records.len() - 1, window));
                }
                Err(SourceError::NoDataInRange) => {
                    records.push(QueryRecord::new(&query, attempts, QueryOutcome::NoData));
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "query failed");
                    records.push(QueryRecord::new(
                        &query,
                        attempts,
                        QueryOutcome::Failed {
                            error: e.to_string(),
                        },
                    ));
                }
            }
        }

        // Reproject every fetched window onto the target grid in parallel,
        // keeping enumeration order.
        let resampling = options.resampling;
        let reprojected = tokio::task::spawn_blocking(move || {
            windows
                .into_par_iter()
                .map(|(record, window)| (record, reproject(&window, &grid, resampling)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| HarvestError::TaskFailure(e.to_string()))?;

        let mut on_grid: Vec<(usize, RasterWindow)> = vec![];
        for (record, result) in reprojected {
            match result {
                Ok(window) => on_grid.push((record, window)),
                Err(e) => {
                    warn!(error = %e, "window excluded from mosaic");
                    records[record].outcome = QueryOutcome::Failed {
                        error: e.to_string(),
                    };
                }
            }
        }

        // Mixed band counts cannot be mosaicked; drop the minority windows.
        if let Some(&(_, ref first)) = on_grid.first() {
            let bands = first.bands;
            on_grid.retain(|(record, window)| {
                if window.bands == bands {
                    true
                } else {
                    warn!(query = records[*record].index, "band count mismatch");
                    records[*record].outcome = QueryOutcome::Failed {
                        error: format!("band count {} differs from {}", window.bands, bands),
                    };
                    false
                }
            });
        }

        let total = records.len();
        let failed = records.iter().filter(|r| r.failed()).count();
        if total > 0 && failed as f64 / total as f64 > options.failure_threshold {
            return Err(HarvestError::TooManyFailures { failed, total });
        }

        let mut windows: Vec<RasterWindow> = on_grid.into_iter().map(|(_, w)| w).collect();
        if let Some(mask_raster) = &mask_raster {
            if options.mask_stage == MaskStage::PreMosaic {
                windows = windows
                    .into_iter()
                    .map(|w| mask::apply(w, mask_raster.as_ref(), options.mask_mode))
                    .collect();
            }
        }

        let mut mosaic = merge(&windows, &grid, options.conflict_policy);
        if let Some(mask_raster) = &mask_raster {
            if options.mask_stage == MaskStage::PostMosaic {
                mosaic = mask::apply(mosaic, mask_raster.as_ref(), options.mask_mode);
            }
        }

        if self.cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        let tiling = TilingConfig {
            tile_size: options.tile_size,
            compression: options.compression.codec(),
            overview_levels: options.overview_levels,
            ..TilingConfig::default()
        };
        let path = self.config.output_path.clone();
        let summary = tokio::task::spawn_blocking(move || CogWriter::new(tiling).write(&path, &mosaic))
            .await
            .map_err(|e| HarvestError::TaskFailure(e.to_string()))??;
        info!(
            bytes = summary.bytes_written,
            overviews = summary.overview_count,
            "cog written"
        );

        let provenance = Provenance::new(grid.epsg(), records);
        let status = if provenance.failed_count() == 0 {
            HarvestStatus::Complete
        } else {
            HarvestStatus::Partial
        };
        let sidecar = sidecar_path(&self.config.output_path);
        let json = serde_json::to_vec_pretty(&provenance)?;
        if let Err(e) = tokio::fs::write(&sidecar, &json).await {
            // Keep the zero-or-both guarantee for the output pair.
            let _ = tokio::fs::remove_file(&self.config.output_path).await;
            return Err(e.into());
        }

        info!(
            path = %self.config.output_path.display(),
            ?status,
            failed,
            total,
            "harvest finished"
        );
        Ok(HarvestResult {
            path: self.config.output_path.clone(),
            sidecar_path: sidecar,
            grid,
            status,
            provenance,
        })
    }
}

async fn fetch_with_retry(
    adapter: Arc<dyn SourceAdapter>,
    query: SourceQuery,
    retry_limit: u32,
    backoff: Duration,
    cancel: CancellationToken,
) -> (SourceQuery, u32, Result<RasterWindow, SourceError>) {
    let cancelled = || SourceError::Unavailable("cancelled".to_string());
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return (query, attempts, Err(cancelled())),
            result = adapter.fetch(&query) => result,
        };
        match result {
            Ok(window) => return (query, attempts, Ok(window)),
            Err(e) if e.retryable() && attempts <= retry_limit => {
                let delay = backoff * 2u32.saturating_pow(attempts - 1);
                warn!(query = %query, attempt = attempts, error = %e, "fetch failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return (query, attempts, Err(cancelled())),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return (query, attempts, Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cog::CogReader;
    use crate::geo::BoundingBox;
    use crate::mosaic::ConflictPolicy;
    use crate::reproject::Resampling;
    use crate::source::SourceSpec;
    use async_trait::async_trait;
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockSource {
        id: String,
        window: RasterWindow,
        failures_before_success: AtomicU32,
        always_fail: bool,
        fetch_delay: Duration,
    }

    impl MockSource {
        fn new(id: &str, window: RasterWindow) -> Self {
            Self {
                id: id.to_string(),
                window,
                failures_before_success: AtomicU32::new(0),
                always_fail: false,
                fetch_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for MockSource {
        fn id(&self) -> &str {
            &self.id
        }

        async fn query(
            &self,
            bbox: &BoundingBox,
            params: &QueryParams,
        ) -> Result<Vec<SourceQuery>, SourceError> {
            Ok(vec![SourceQuery {
                source_id: self.id.clone(),
                index: 0,
                bbox: *bbox,
                resolution: params.resolution,
                layer: String::new(),
                time_range: None,
            }])
        }

        async fn fetch(&self, _query: &SourceQuery) -> Result<RasterWindow, SourceError> {
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            if self.always_fail {
                return Err(SourceError::Unavailable("mock outage".to_string()));
            }
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(SourceError::Unavailable("mock hiccup".to_string()));
            }
            Ok(self.window.clone())
        }
    }

    fn test_config(dir: &Path, policy: ConflictPolicy) -> HarvestConfig {
        HarvestConfig {
            bbox: [0.0, 0.0, 2.0, 2.0],
            crs: "EPSG:3857".to_string(),
            resolution: Resolution::Square(1.0),
            sources: vec![SourceSpec::Geotiff {
                id: "placeholder".to_string(),
                path: dir.join("placeholder.tif"),
            }],
            output_path: dir.join("out.tif"),
            time_range: None,
            mask: None,
            options: HarvestOptions {
                conflict_policy: policy,
                resampling: Resampling::Nearest,
                retry_backoff_ms: 1,
                tile_size: 64,
                ..Default::default()
            },
        }
    }

    fn grid_window(value: f32) -> RasterWindow {
        let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0, 3857).unwrap();
        let grid = GridSpec::from_bbox(&bbox, (1.0, 1.0)).unwrap();
        let mut window = RasterWindow::filled(&grid, 1, -9999.0);
        for v in window.buffer.iter_mut() {
            *v = value;
        }
        window
    }

    #[tokio::test]
    async fn end_to_end_mean_mosaic_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), ConflictPolicy::MeanOfValid);
        let harvester = Harvester::with_sources(
            config,
            vec![
                Arc::new(MockSource::new("ones", grid_window(1.0))),
                Arc::new(MockSource::new("twos", grid_window(2.0))),
            ],
        )
        .unwrap();

        let result = harvester.run().await.unwrap();
        assert_eq!(result.status, HarvestStatus::Complete);
        assert_eq!((result.grid.width(), result.grid.height()), (2, 2));

        let mut reader = CogReader::open(File::open(&result.path).unwrap()).unwrap();
        assert_eq!(reader.geo.epsg, 3857);
        assert_eq!(reader.geo.origin, (0.0, 2.0));
        assert_eq!(reader.geo.pixel_size, (1.0, 1.0));
        let back = reader.read_all().unwrap();
        assert_eq!(back.buffer, vec![1.5; 4]);

        let sidecar = std::fs::read_to_string(&result.sidecar_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(value["queries"].as_array().unwrap().len(), 2);
        assert_eq!(value["queries"][0]["outcome"]["kind"], "fetched");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), ConflictPolicy::FirstWins);
        let flaky = MockSource {
            failures_before_success: AtomicU32::new(2),
            ..MockSource::new("flaky", grid_window(7.0))
        };
        let harvester = Harvester::with_sources(config, vec![Arc::new(flaky)]).unwrap();

        let result = harvester.run().await.unwrap();
        assert_eq!(result.status, HarvestStatus::Complete);
        assert_eq!(result.provenance.queries[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), ConflictPolicy::FirstWins);
        config.options.failure_threshold = 1.0;
        config.options.retry_limit = 1;
        let down = MockSource {
            always_fail: true,
            ..MockSource::new("down", grid_window(0.0))
        };
        let harvester = Harvester::with_sources(
            config,
            vec![
                Arc::new(MockSource::new("up", grid_window(5.0))),
                Arc::new(down),
            ],
        )
        .unwrap();

        let result = harvester.run().await.unwrap();
        assert_eq!(result.status, HarvestStatus::Partial);
        assert_eq!(result.provenance.failed_count(), 1);
        assert!(result.path.exists());

        let mut reader = CogReader::open(File::open(&result.path).unwrap()).unwrap();
        assert_eq!(reader.read_all().unwrap().buffer, vec![5.0; 4]);
    }

    #[tokio::test]
    async fn failure_threshold_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), ConflictPolicy::FirstWins);
        config.options.failure_threshold = 0.0;
        config.options.retry_limit = 0;
        let down = MockSource {
            always_fail: true,
            ..MockSource::new("down", grid_window(0.0))
        };
        let harvester = Harvester::with_sources(config, vec![Arc::new(down)]).unwrap();

        match harvester.run().await {
            Err(HarvestError::TooManyFailures { failed: 1, total: 1 }) => {}
            other => panic!("expected TooManyFailures, got {other:?}"),
        }
        assert!(!dir.path().join("out.tif").exists());
    }

    #[tokio::test]
    async fn cancellation_mid_fetch_leaves_zero_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), ConflictPolicy::FirstWins);
        let slow = MockSource {
            fetch_delay: Duration::from_secs(60),
            ..MockSource::new("slow", grid_window(1.0))
        };
        let harvester =
            Arc::new(Harvester::with_sources(config, vec![Arc::new(slow)]).unwrap());
        let token = harvester.cancellation_token();

        let running = {
            let harvester = harvester.clone();
            tokio::spawn(async move { harvester.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        match running.await.unwrap() {
            Err(HarvestError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(!dir.path().join("out.tif").exists());
        assert!(!dir.path().join("out.tif.provenance.json").exists());
    }

    #[tokio::test]
    async fn inline_mask_clips_the_mosaic() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), ConflictPolicy::FirstWins);
        // A near-global WGS84 polygon, so the whole 2x2 mercator region
        // reprojects inside it and every pixel must survive the clip.
        config.mask = Some(MaskSpec::Inline {
            geometry: serde_json::json!({
                "type": "Polygon",
                "coordinates": [[
                    [-179.0, -85.0], [179.0, -85.0], [179.0, 85.0],
                    [-179.0, 85.0], [-179.0, -85.0]
                ]]
            }),
        });
        config.options.mask_mode = crate::mask::MaskMode::SetNodataOutside;
        let harvester = Harvester::with_sources(
            config,
            vec![Arc::new(MockSource::new("ones", grid_window(3.0)))],
        )
        .unwrap();

        let result = harvester.run().await.unwrap();
        let mut reader = CogReader::open(File::open(&result.path).unwrap()).unwrap();
        // The region sits well inside the mask, so every pixel survives.
        assert_eq!(reader.read_all().unwrap().buffer, vec![3.0; 4]);
    }
}
