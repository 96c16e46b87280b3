use std::fmt::{Display, Formatter};
use std::str::FromStr;

use geo::{BooleanOps, BoundingRect, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Geometry;
use crate::spatial;
use crate::ValidationError;

/// Coordinate reference systems accepted for a query region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Longitude/latitude degrees (EPSG:4326).
    Wgs84,
    /// Spherical Web Mercator metres (EPSG:3857).
    WebMercator,
}

impl Crs {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Wgs84 => "EPSG:4326",
            Self::WebMercator => "EPSG:3857",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "epsg:4326" | "4326" | "wgs84" | "wgs-84" => Ok(Self::Wgs84),
            "epsg:3857" | "3857" | "web-mercator" | "webmercator" | "pseudo-mercator" => {
                Ok(Self::WebMercator)
            }
            _ => Err(ValidationError::UnknownCrs {
                value: input.to_owned(),
            }),
        }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::Wgs84
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Crs {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.code().to_owned()
    }
}

/// Polygonal area a job harvests, fixed for the lifetime of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRegion {
    geometry: MultiPolygon<f64>,
    crs: Crs,
}

impl QueryRegion {
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Result<Self, ValidationError> {
        if geometry.0.is_empty() {
            return Err(ValidationError::EmptyRegion);
        }
        let finite = geometry.0.iter().all(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .flat_map(|ring| ring.coords())
                .all(|coord| coord.x.is_finite() && coord.y.is_finite())
        });
        if !finite {
            return Err(ValidationError::NonFiniteCoordinate);
        }

        Ok(Self { geometry, crs })
    }

    pub fn from_geometry(geometry: &Geometry, crs: Crs) -> Result<Self, ValidationError> {
        Self::new(geometry.to_multi_polygon()?, crs)
    }

    /// Reads a region from GeoJSON.
    ///
    /// Accepts a bare geometry, a `Feature`, or a `FeatureCollection` whose
    /// polygonal members are unioned into one region.
    pub fn from_geojson(value: &Value, crs: Crs) -> Result<Self, ValidationError> {
        let geometries = collect_geometries(value)?;
        let mut merged: Option<MultiPolygon<f64>> = None;
        for geometry in geometries {
            let polygons = geometry.to_multi_polygon()?;
            merged = Some(match merged {
                None => polygons,
                Some(current) => current.union(&polygons),
            });
        }

        Self::new(merged.ok_or(ValidationError::EmptyRegion)?, crs)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub const fn crs(&self) -> Crs {
        self.crs
    }

    /// Area in km², measured in Web Mercator.
    pub fn area_km2(&self) -> f64 {
        spatial::area_km2(&self.geometry, self.crs)
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

fn collect_geometries(value: &Value) -> Result<Vec<Geometry>, ValidationError> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or(ValidationError::EmptyRegion)?;
            let mut geometries = Vec::with_capacity(features.len());
            for feature in features {
                geometries.extend(collect_geometries(feature)?);
            }
            Ok(geometries)
        }
        "Feature" => match value.get("geometry") {
            Some(geometry) if !geometry.is_null() => collect_geometries(geometry),
            _ => Err(ValidationError::EmptyRegion),
        },
        _ => {
            let geometry = Geometry::deserialize(value).map_err(|_| {
                ValidationError::NonPolygonalRegion {
                    kind: "unsupported",
                }
            })?;
            Ok(vec![geometry])
        }
    }
}
