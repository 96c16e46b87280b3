//! Request payloads and response decoding for the cadastral service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{AttributeValue, Attributes, Crs, ExternalId, Feature, Geometry, Tile};

/// Coordinate system of every geometry the service returns. Requests are sent
/// in WGS-84, answers come back in Web Mercator metres.
pub const RESPONSE_CRS: Crs = Crs::WebMercator;

/// POST body: one category and the tile geometry wrapped in a feature
/// collection, in WGS-84.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPayload {
    pub categories: Vec<CategoryRef>,
    pub geom: GeometryEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<EnvelopeFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct EnvelopeFeature {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: Geometry,
    properties: serde_json::Map<String, Value>,
}

impl RequestPayload {
    pub fn new(category_id: u64, geometry: Geometry) -> Self {
        Self {
            categories: vec![CategoryRef { id: category_id }],
            geom: GeometryEnvelope {
                kind: "FeatureCollection",
                features: vec![EnvelopeFeature {
                    kind: "Feature",
                    geometry,
                    properties: serde_json::Map::new(),
                }],
            },
        }
    }

    pub fn for_tile(category_id: u64, tile: &Tile) -> Self {
        Self::new(category_id, tile.to_wgs84_geometry())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Canonical form of the payload: object keys sorted, no whitespace.
    /// Two payloads describing the same request share one key.
    pub fn cache_key(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_value(self)?;
        serde_json::to_string(&canonical)
    }
}

/// Features decoded from one response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPage {
    pub features: Vec<Feature>,
    /// Entries that were present but unusable.
    pub skipped: u64,
}

/// Body could not be read as a response document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedBody(pub String);

#[derive(Debug, Deserialize)]
struct ResponseDocument {
    #[serde(default)]
    features: Option<Value>,
}

/// Decodes a response body.
///
/// A blank body, a missing `features` member or an empty list all mean "no
/// data". Each feature is decoded on its own; one without an identity or a
/// usable geometry is skipped rather than failing the whole page.
pub fn decode_response(body: &str) -> Result<DecodedPage, MalformedBody> {
    if body.trim().is_empty() {
        return Ok(DecodedPage::default());
    }

    let document: ResponseDocument =
        serde_json::from_str(body).map_err(|error| MalformedBody(error.to_string()))?;
    let entries = match document.features {
        None | Some(Value::Null) => return Ok(DecodedPage::default()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(MalformedBody(format!(
                "expected 'features' to be an array, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut page = DecodedPage {
        features: Vec::with_capacity(entries.len()),
        skipped: 0,
    };
    for entry in &entries {
        match decode_feature(entry) {
            Some(feature) => page.features.push(feature),
            None => page.skipped += 1,
        }
    }
    if page.skipped > 0 {
        debug!(skipped = page.skipped, kept = page.features.len(), "skipped unusable features");
    }
    Ok(page)
}

fn decode_feature(entry: &Value) -> Option<Feature> {
    let properties = entry.get("properties")?;
    let id = ExternalId::from_json(properties.get("interactionId")?)?;

    let geometry = Geometry::deserialize(entry.get("geometry")?).ok()?;
    if geometry.is_empty() || !geometry.is_finite() {
        return None;
    }

    let attributes = match properties.get("options") {
        Some(Value::Object(options)) => collect_attributes(options.iter()),
        _ => collect_attributes(
            properties
                .as_object()?
                .iter()
                .filter(|(key, _)| key.as_str() != "interactionId"),
        ),
    };

    Some(Feature {
        id,
        geometry,
        attributes,
    })
}

fn collect_attributes<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> Attributes {
    entries
        .map(|(key, value)| (key.clone(), AttributeValue::from_json(value)))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
