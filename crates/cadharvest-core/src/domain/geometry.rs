use std::fmt::{Display, Formatter};

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// A GeoJSON position. A third ordinate is accepted on input and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = ValidationError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        match value.as_slice() {
            [x, y, ..] => Ok(Self::new(*x, *y)),
            _ => Err(ValidationError::InvalidPosition { len: value.len() }),
        }
    }
}

impl From<Position> for [f64; 2] {
    fn from(value: Position) -> Self {
        [value.x, value.y]
    }
}

impl From<Coord<f64>> for Position {
    fn from(value: Coord<f64>) -> Self {
        Self::new(value.x, value.y)
    }
}

impl From<Position> for Coord<f64> {
    fn from(value: Position) -> Self {
        Coord {
            x: value.x,
            y: value.y,
        }
    }
}

/// Discriminant of [`Geometry`], used for reporting geometry diversity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::MultiPoint => "MultiPoint",
            Self::LineString => "LineString",
            Self::MultiLineString => "MultiLineString",
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
        }
    }
}

impl Display for GeometryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of GeoJSON geometry kinds returned by the cadastral service.
///
/// Serializes as a GeoJSON geometry object (`{"type": ..., "coordinates": ...}`).
/// Any other `type` fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::MultiPoint(_) => GeometryKind::MultiPoint,
            Self::LineString(_) => GeometryKind::LineString,
            Self::MultiLineString(_) => GeometryKind::MultiLineString,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    /// True when the geometry has no positions at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Point(_) => false,
            Self::MultiPoint(points) | Self::LineString(points) => points.is_empty(),
            Self::MultiLineString(lines) | Self::Polygon(lines) => {
                lines.iter().all(Vec::is_empty)
            }
            Self::MultiPolygon(polygons) => polygons.iter().flatten().all(Vec::is_empty),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.positions().all(Position::is_finite)
    }

    /// Iterates over every position regardless of nesting depth.
    pub fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        match self {
            Self::Point(point) => Box::new(std::iter::once(*point)),
            Self::MultiPoint(points) | Self::LineString(points) => Box::new(points.iter().copied()),
            Self::MultiLineString(lines) | Self::Polygon(lines) => {
                Box::new(lines.iter().flatten().copied())
            }
            Self::MultiPolygon(polygons) => Box::new(polygons.iter().flatten().flatten().copied()),
        }
    }

    /// Returns a copy with every position transformed by `f`.
    pub fn map_positions(&self, f: impl Fn(Position) -> Position + Copy) -> Self {
        let line = |points: &Vec<Position>| points.iter().copied().map(f).collect::<Vec<_>>();
        match self {
            Self::Point(point) => Self::Point(f(*point)),
            Self::MultiPoint(points) => Self::MultiPoint(line(points)),
            Self::LineString(points) => Self::LineString(line(points)),
            Self::MultiLineString(lines) => Self::MultiLineString(lines.iter().map(line).collect()),
            Self::Polygon(rings) => Self::Polygon(rings.iter().map(line).collect()),
            Self::MultiPolygon(polygons) => Self::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(line).collect())
                    .collect(),
            ),
        }
    }

    /// Converts a polygonal geometry into a planar multipolygon.
    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, ValidationError> {
        let polygons = match self {
            Self::Polygon(rings) => vec![polygon_from_rings(rings)?],
            Self::MultiPolygon(polygons) => polygons
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(ValidationError::NonPolygonalRegion {
                    kind: other.kind().as_str(),
                })
            }
        };
        Ok(MultiPolygon::new(polygons))
    }

    /// Builds a `Polygon` for a single member and a `MultiPolygon` otherwise.
    pub fn from_multi_polygon(value: &MultiPolygon<f64>) -> Self {
        let mut polygons: Vec<Vec<Vec<Position>>> = value.0.iter().map(rings_from_polygon).collect();
        if polygons.len() == 1 {
            if let Some(rings) = polygons.pop() {
                return Self::Polygon(rings);
            }
        }
        Self::MultiPolygon(polygons)
    }
}

fn polygon_from_rings(rings: &[Vec<Position>]) -> Result<Polygon<f64>, ValidationError> {
    let mut rings = rings.iter().map(|ring| {
        if ring.len() < 4 {
            return Err(ValidationError::RingTooShort { len: ring.len() });
        }
        if !ring.iter().all(|position| position.is_finite()) {
            return Err(ValidationError::NonFiniteCoordinate);
        }
        Ok(LineString::new(ring.iter().copied().map(Coord::from).collect()))
    });

    let exterior = rings.next().ok_or(ValidationError::EmptyRegion)??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn rings_from_polygon(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().copied().map(Position::from).collect())
        .collect()
}
