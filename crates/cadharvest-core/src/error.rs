use thiserror::Error;

use crate::diagnostics::DiagnosticsSummary;

/// Contract violations detected before any request is issued.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("query region must contain at least one polygon")]
    EmptyRegion,
    #[error("query region must be polygonal, got '{kind}'")]
    NonPolygonalRegion { kind: &'static str },
    #[error("query region contains a non-finite coordinate")]
    NonFiniteCoordinate,
    #[error("polygon ring must have at least 4 positions, got {len}")]
    RingTooShort { len: usize },
    #[error("position must have at least 2 ordinates, got {len}")]
    InvalidPosition { len: usize },

    #[error("unknown coordinate reference system '{value}', expected EPSG:4326 or EPSG:3857")]
    UnknownCrs { value: String },

    #[error("split threshold must be a positive number of km², got {value}")]
    InvalidSplitThreshold { value: f64 },
    #[error("split threshold gives a {grid}x{grid} grid, more than {limit} tiles")]
    TooManyTiles { grid: usize, limit: usize },
    #[error("timeout schedule must contain at least one positive value")]
    EmptyTimeoutSchedule,
    #[error("invalid timeout value '{value}'")]
    InvalidTimeout { value: String },
    #[error("invalid count '{value}', expected a non-negative integer")]
    InvalidCount { value: String },
    #[error("category '{category}' must allow at least one worker")]
    ZeroWorkers { category: String },
    #[error("rate limit must admit at least one request per window")]
    ZeroRateLimit,
    #[error("unknown category '{value}'")]
    UnknownCategory { value: String },

    #[error("endpoint url cannot be empty")]
    EmptyEndpoint,
    #[error(
        "timeout ceilings must grow outwards: attempt {attempt_ms}ms < tile {tile_ms}ms < job {job_ms}ms"
    )]
    CeilingOrder {
        attempt_ms: u128,
        tile_ms: u128,
        job_ms: u128,
    },
}

/// Job-level failure.
///
/// Partial coverage is never an error; a job only fails when no tile produced
/// any result at all and the job was not cancelled.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no tile produced a result ({} failures recorded)", diagnostics.failure_total())]
    AllTilesFailed { diagnostics: DiagnosticsSummary },
}

impl HarvestError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "harvest.invalid_request",
            Self::AllTilesFailed { .. } => "harvest.all_tiles_failed",
        }
    }
}
