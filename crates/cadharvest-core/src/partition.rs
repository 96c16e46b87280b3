//! Area-driven splitting of a query region into fetchable tiles.

use tracing::{debug, info};

use crate::domain::{QueryRegion, Tile, TileLabel};
use crate::spatial;
use crate::ValidationError;

/// Largest grid, in cells, a single region may be split into.
pub const MAX_TILES: usize = 10_000;

/// Splits a region into a grid of tiles when it exceeds a category's area
/// threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaPartitioner;

impl AreaPartitioner {
    pub const fn new() -> Self {
        Self
    }

    /// Partitions `region` for a category whose split threshold is
    /// `threshold_km2`. `None` disables splitting.
    ///
    /// Always returns at least one tile; a degenerate region whose grid
    /// yields no usable cell comes back as a single tile equal to itself.
    pub fn partition(
        &self,
        region: &QueryRegion,
        threshold_km2: Option<f64>,
    ) -> Result<Vec<Tile>, ValidationError> {
        let Some(threshold) = threshold_km2 else {
            debug!("splitting disabled for category, fetching region as one tile");
            return Ok(vec![Tile::whole(region)]);
        };
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(ValidationError::InvalidSplitThreshold { value: threshold });
        }

        let area = region.area_km2();
        if area <= threshold {
            debug!(area_km2 = area, threshold_km2 = threshold, "region below split threshold");
            return Ok(vec![Tile::whole(region)]);
        }

        let n = grid_size(area, threshold);
        let grid_cells = n
            .checked_mul(n)
            .filter(|cells| *cells <= MAX_TILES)
            .ok_or(ValidationError::TooManyTiles {
                grid: n,
                limit: MAX_TILES,
            })?;
        let cells = spatial::grid_intersections(region.geometry(), n);
        if cells.is_empty() {
            debug!(area_km2 = area, grid = n, "grid produced no usable cell, keeping region whole");
            return Ok(vec![Tile::whole(region)]);
        }

        info!(
            area_km2 = area,
            threshold_km2 = threshold,
            grid = n,
            kept = cells.len(),
            skipped = grid_cells - cells.len(),
            "partitioned region"
        );

        Ok(cells
            .into_iter()
            .enumerate()
            .map(|(index, geometry)| Tile::new(TileLabel::root(index + 1), geometry, region.crs()))
            .collect())
    }
}

/// `ceil(sqrt(area / threshold))`, at least 1.
pub fn grid_size(area_km2: f64, threshold_km2: f64) -> usize {
    let n = (area_km2 / threshold_km2).sqrt().ceil();
    if n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        1
    }
}
