pub mod feature;
pub mod geometry;
pub mod region;
pub mod tile;

pub use feature::{AttributeValue, Attributes, ExternalId, Feature, FeatureCollection, LIST_DELIMITER};
pub use geometry::{Geometry, GeometryKind, Position};
pub use region::{Crs, QueryRegion};
pub use tile::{Tile, TileLabel};
