use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::diagnostics::DiagnosticsSummary;
use crate::domain::{Crs, FeatureCollection, TileLabel};
use crate::fetcher::{FetchResult, TileStatus};
use crate::subdivide::TileFailure;

/// Job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Per-tile line of a [`HarvestReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileReport {
    pub label: TileLabel,
    pub status: TileStatus,
    pub attempts: u32,
    pub features: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TileFailure>,
}

impl From<&FetchResult> for TileReport {
    fn from(result: &FetchResult) -> Self {
        Self {
            label: result.label.clone(),
            status: result.status,
            attempts: result.attempts,
            features: result.features.len(),
            elapsed_ms: result.elapsed.as_millis() as u64,
            failures: result.failures.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub id: u64,
    pub name: String,
}

/// Outcome of one job: the assembled features plus everything that went
/// wrong on the way. Partial coverage is reported here, not as an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestReport {
    pub job_id: JobId,
    pub category: CategorySummary,
    /// CRS of the geometries in `features`.
    pub crs: Crs,
    /// CRS the query region was given in.
    pub region_crs: Crs,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub started_at: OffsetDateTime,
    pub elapsed_ms: u64,
    pub planned_tiles: usize,
    pub tiles: Vec<TileReport>,
    pub cancelled: bool,
    pub diagnostics: DiagnosticsSummary,
    pub features: FeatureCollection,
}

impl HarvestReport {
    pub fn succeeded_tiles(&self) -> usize {
        self.tiles
            .iter()
            .filter(|tile| tile.status.produced_result())
            .count()
    }

    /// True when every tile answered and nothing was dropped.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self
                .tiles
                .iter()
                .all(|tile| tile.status == TileStatus::Complete)
    }
}

fn serialize_rfc3339<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let formatted = value
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}
