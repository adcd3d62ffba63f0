//! geoharvest: harvest remote raster data into Cloud Optimized GeoTIFFs.
//!
//! The pipeline runs in fixed stages: source adapters fetch raw windows,
//! the reprojector puts them on one target grid, the mosaicker merges them
//! under a conflict policy, an optional mask clips the result, and the COG
//! writer lays the mosaic out with directories up front and overviews for
//! ranged readers. [`harvest::Harvester`] drives the whole thing from a
//! JSON config and records per-query provenance next to the output.
//!
//! ```no_run
//! use geoharvest::harvest::{HarvestConfig, Harvester};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::load(std::path::Path::new("harvest.json"))?;
//! let result = Harvester::new(config)?.run().await?;
//! println!("{} ({:?})", result.path.display(), result.status);
//! # Ok(())
//! # }
//! ```

pub mod cog;
pub mod geo;
pub mod geotiff;
pub mod harvest;
pub mod mask;
pub mod mosaic;
pub mod raster;
pub mod reproject;
pub mod source;

pub use cog::{CogReader, CogWriter, TilingConfig};
pub use geo::{BoundingBox, GridSpec};
pub use harvest::{HarvestConfig, HarvestError, HarvestResult, HarvestStatus, Harvester};
pub use raster::RasterWindow;
