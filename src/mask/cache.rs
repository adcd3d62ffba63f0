use super::{rasterize, InclusionRule, Mask, MaskError};
use crate::geo::GridSpec;
use crate::raster::RasterWindow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

type Slot = Arc<Mutex<Option<Arc<RasterWindow>>>>;

/// Process-scoped cache of rasterized masks.
///
/// Rasterizing the same mask onto the same grid happens once; concurrent
/// harvests asking for the same key serialize on a per-key lock, so the
/// second request waits for the first result instead of redoing the work.
/// Distinct keys never contend.
#[derive(Default)]
pub struct MaskCache {
    slots: std::sync::Mutex<HashMap<String, Slot>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a (mask name, grid, rule) combination.
    pub fn key(name: &str, grid: &GridSpec, rule: InclusionRule) -> String {
        format!(
            "{name}|{}|{:?}|{:?}|{}x{}|{rule:?}",
            grid.epsg(),
            grid.origin(),
            grid.pixel_size(),
            grid.width(),
            grid.height(),
        )
    }

    pub async fn get_or_rasterize(
        &self,
        key: &str,
        mask: &Mask,
        grid: &GridSpec,
        rule: InclusionRule,
    ) -> Result<Arc<RasterWindow>, MaskError> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            slots.entry(key.to_string()).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            debug!(key, "mask cache hit");
            return Ok(cached.clone());
        }
        let rasterized = Arc::new(rasterize(mask, grid, rule)?);
        *entry = Some(rasterized.clone());
        Ok(rasterized)
    }
}
