use std::fmt::{Display, Formatter};

use geo::{BoundingRect, MultiPolygon};
use serde::Serialize;

use crate::domain::{Crs, Geometry, QueryRegion};
use crate::spatial;

/// Path-like label of a tile, e.g. `3.2.1`. Used for tracing only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TileLabel(String);

impl TileLabel {
    /// Label of the `index`-th (1-based) tile of a partition.
    pub fn root(index: usize) -> Self {
        Self(index.to_string())
    }

    /// Label of the `index`-th (1-based) quadrant of this tile.
    pub fn child(&self, index: usize) -> Self {
        Self(format!("{}.{index}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric path components, for ordering `2` before `10`.
    pub fn segments(&self) -> Vec<u64> {
        self.0
            .split('.')
            .map(|segment| segment.parse().unwrap_or(u64::MAX))
            .collect()
    }
}

impl From<&str> for TileLabel {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for TileLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A piece of the query region.
///
/// The geometry is always an intersection with the region, never a raw grid
/// cell, so a tile never reaches outside the area being harvested.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub label: TileLabel,
    pub depth: u32,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl Tile {
    pub fn new(label: TileLabel, geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self {
            label,
            depth: 0,
            geometry,
            crs,
        }
    }

    /// Single tile covering the whole region.
    pub fn whole(region: &QueryRegion) -> Self {
        Self::new(TileLabel::root(1), region.geometry().clone(), region.crs())
    }

    /// Splits the tile along a 2×2 grid over its bounding box, keeping only
    /// the non-empty intersections. Children are one level deeper.
    pub fn quarter(&self) -> Vec<Tile> {
        spatial::grid_intersections(&self.geometry, 2)
            .into_iter()
            .enumerate()
            .map(|(index, geometry)| Tile {
                label: self.label.child(index + 1),
                depth: self.depth + 1,
                geometry,
                crs: self.crs,
            })
            .collect()
    }

    pub fn area_km2(&self) -> f64 {
        spatial::area_km2(&self.geometry, self.crs)
    }

    /// `[min_x, min_y, max_x, max_y]` in the tile's own CRS.
    pub fn bbox(&self) -> Option<[f64; 4]> {
        self.geometry
            .bounding_rect()
            .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y])
    }

    /// Tile geometry in WGS-84, the CRS the remote service expects.
    pub fn to_wgs84_geometry(&self) -> Geometry {
        Geometry::from_multi_polygon(&spatial::to_wgs84(&self.geometry, self.crs))
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn square_tile(side: f64) -> Tile {
        Tile::new(
            TileLabel::root(3),
            MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: side, y: 0.0),
                (x: side, y: side),
                (x: 0.0, y: side),
                (x: 0.0, y: 0.0),
            ]]),
            Crs::WebMercator,
        )
    }

    #[test]
    fn labels_extend_with_one_based_indexes() {
        let label = TileLabel::root(3).child(2).child(1);
        assert_eq!(label.as_str(), "3.2.1");
    }

    #[test]
    fn quartering_a_square_yields_four_deeper_children() {
        let children = square_tile(2_000.0).quarter();

        assert_eq!(children.len(), 4);
        assert!(children.iter().all(|child| child.depth == 1));
        assert_eq!(children[0].label.as_str(), "3.1");
        assert_eq!(children[3].label.as_str(), "3.4");
        let total: f64 = children.iter().map(Tile::area_km2).sum();
        assert!((total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn mercator_tile_is_sent_in_degrees() {
        let geometry = square_tile(1_000.0).to_wgs84_geometry();
        let max_x = geometry
            .positions()
            .map(|position| position.x)
            .fold(f64::MIN, f64::max);
        assert!(max_x > 0.0 && max_x < 0.01);
    }
}
