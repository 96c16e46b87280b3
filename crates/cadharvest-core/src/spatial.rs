//! Planar helpers shared by the partitioner and the subdivider.
//!
//! Areas are measured in Web Mercator (EPSG:3857) regardless of the region's
//! own CRS. Grids are laid out over the geometry's bounding box in its own CRS
//! and every cell is clipped against the geometry, so a grid never reaches
//! outside the area it was built from.

use std::f64::consts::PI;

use geo::{Area, BooleanOps, BoundingRect, Coord, MapCoords, MultiPolygon, Rect};

use crate::domain::Crs;

/// WGS-84 semi-major axis, as used by EPSG:3857.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

const SQUARE_METERS_PER_KM2: f64 = 1_000_000.0;

/// Clipped cells whose area is below this share of a full cell are slivers
/// produced by floating-point edges, not real coverage.
const SLIVER_RATIO: f64 = 1e-9;

pub fn lon_lat_to_mercator(coord: Coord<f64>) -> Coord<f64> {
    let latitude = coord.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    Coord {
        x: EARTH_RADIUS_M * coord.x.to_radians(),
        y: EARTH_RADIUS_M * (PI / 4.0 + latitude.to_radians() / 2.0).tan().ln(),
    }
}

pub fn mercator_to_lon_lat(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (coord.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees(),
    }
}

/// Reprojects `geometry` from `crs` to Web Mercator.
pub fn to_mercator(geometry: &MultiPolygon<f64>, crs: Crs) -> MultiPolygon<f64> {
    match crs {
        Crs::WebMercator => geometry.clone(),
        Crs::Wgs84 => geometry.map_coords(lon_lat_to_mercator),
    }
}

/// Reprojects `geometry` from `crs` to WGS-84 longitude/latitude.
pub fn to_wgs84(geometry: &MultiPolygon<f64>, crs: Crs) -> MultiPolygon<f64> {
    match crs {
        Crs::Wgs84 => geometry.clone(),
        Crs::WebMercator => geometry.map_coords(mercator_to_lon_lat),
    }
}

/// Area of `geometry` in km², measured in Web Mercator.
pub fn area_km2(geometry: &MultiPolygon<f64>, crs: Crs) -> f64 {
    to_mercator(geometry, crs).unsigned_area() / SQUARE_METERS_PER_KM2
}

/// Splits `geometry` along an `n`×`n` grid laid over its bounding box.
///
/// Cells are visited column by column (x outer, y inner). Cells that do not
/// intersect the geometry, or whose intersection is empty, are dropped; the
/// kept pieces are disjoint and together cover `geometry`.
pub fn grid_intersections(geometry: &MultiPolygon<f64>, n: usize) -> Vec<MultiPolygon<f64>> {
    let Some(bounds) = geometry.bounding_rect() else {
        return Vec::new();
    };
    if n == 0 {
        return Vec::new();
    }

    let cell_width = bounds.width() / n as f64;
    let cell_height = bounds.height() / n as f64;
    let cell_area = cell_width * cell_height;
    if !(cell_area > 0.0) {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let min = Coord {
                x: bounds.min().x + i as f64 * cell_width,
                y: bounds.min().y + j as f64 * cell_height,
            };
            // The last row/column snaps to the bounding box so rounding never
            // leaves an uncovered strip along the far edges.
            let max = Coord {
                x: if i + 1 == n {
                    bounds.max().x
                } else {
                    min.x + cell_width
                },
                y: if j + 1 == n {
                    bounds.max().y
                } else {
                    min.y + cell_height
                },
            };

            let cell = MultiPolygon::new(vec![Rect::new(min, max).to_polygon()]);
            let clipped = cell.intersection(geometry);
            if clipped.0.is_empty() || clipped.unsigned_area() <= cell_area * SLIVER_RATIO {
                continue;
            }
            pieces.push(clipped);
        }
    }
    pieces
}
