use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::domain::{Geometry, GeometryKind};

/// Delimiter used when list-valued attributes are flattened to text.
pub const LIST_DELIMITER: &str = "; ";

/// Stable identity assigned by the remote service (`interactionId`).
///
/// Used to deduplicate features returned by more than one overlapping tile
/// and to correlate features with other datasets downstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Normalizes a raw JSON identity. Numbers and strings are accepted,
    /// blank strings and `"-"` are not identities.
    pub fn from_json(value: &Value) -> Option<Self> {
        let raw = match value {
            Value::String(text) => text.trim().to_owned(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };

        if raw.is_empty() || raw == "-" {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExternalId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for ExternalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute value with its source type preserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Maps a JSON value onto the attribute model. Lists are flattened with
    /// [`LIST_DELIMITER`]; nested objects are kept as compact JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Text(number.to_string())),
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(items) => Self::Text(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(LIST_DELIMITER),
            ),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// One harvested feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: ExternalId,
    pub geometry: Geometry,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: impl Into<ExternalId>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            geometry,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl Serialize for Feature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Properties<'a> {
            #[serde(rename = "interactionId")]
            interaction_id: &'a ExternalId,
            #[serde(flatten)]
            attributes: &'a Attributes,
        }

        let mut state = serializer.serialize_struct("Feature", 4)?;
        state.serialize_field("type", "Feature")?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("geometry", &self.geometry)?;
        state.serialize_field(
            "properties",
            &Properties {
                interaction_id: &self.id,
                attributes: &self.attributes,
            },
        )?;
        state.end()
    }
}

/// Assembled, heterogeneous-geometry result of one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn get(&self, id: &ExternalId) -> Option<&Feature> {
        self.features.iter().find(|feature| &feature.id == id)
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    /// Feature count per geometry kind.
    pub fn kinds(&self) -> BTreeMap<GeometryKind, usize> {
        let mut counts = BTreeMap::new();
        for feature in &self.features {
            *counts.entry(feature.geometry.kind()).or_insert(0) += 1;
        }
        counts
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("FeatureCollection", 2)?;
        state.serialize_field("type", "FeatureCollection")?;
        state.serialize_field("features", &self.features)?;
        state.end()
    }
}

impl<'a> IntoIterator for &'a FeatureCollection {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}
