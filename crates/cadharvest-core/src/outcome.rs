use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::domain::Feature;

/// Error taxonomy for a single tile fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Forbidden,
    Timeout,
    ConnectionFailure,
    TlsFailure,
    ServerError,
    MalformedResponse,
    UnexpectedStatus,
    InvalidRequest,
    TileAbandoned,
    DepthExhausted,
    JobTimedOut,
}

impl ErrorKind {
    pub const ALL: [Self; 12] = [
        Self::RateLimited,
        Self::Forbidden,
        Self::Timeout,
        Self::ConnectionFailure,
        Self::TlsFailure,
        Self::ServerError,
        Self::MalformedResponse,
        Self::UnexpectedStatus,
        Self::InvalidRequest,
        Self::TileAbandoned,
        Self::DepthExhausted,
        Self::JobTimedOut,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::RateLimited => "fetch.rate_limited",
            Self::Forbidden => "fetch.forbidden",
            Self::Timeout => "fetch.timeout",
            Self::ConnectionFailure => "fetch.connection_failure",
            Self::TlsFailure => "fetch.tls_failure",
            Self::ServerError => "fetch.server_error",
            Self::MalformedResponse => "fetch.malformed_response",
            Self::UnexpectedStatus => "fetch.unexpected_status",
            Self::InvalidRequest => "fetch.invalid_request",
            Self::TileAbandoned => "fetch.tile_abandoned",
            Self::DepthExhausted => "fetch.depth_exhausted",
            Self::JobTimedOut => "fetch.job_timed_out",
        }
    }

    /// Whether the HTTP client retries the same request after backing off.
    ///
    /// Timeouts are recovered by subdivision, not by repeating the request.
    pub const fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ConnectionFailure | Self::TlsFailure | Self::ServerError
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a tile fetch produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one request for one tile.
///
/// `Empty` and `TimedOut` are ordinary values: the first means the service has
/// no data in the area, the second asks the caller to try a smaller area.
/// `Cancelled` means the job was stopped before the tile got an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Features(Vec<Feature>),
    Empty,
    TimedOut,
    Cancelled,
    Failed(FetchFailure),
}

impl FetchOutcome {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed(FetchFailure::new(kind, message))
    }

    /// Wraps decoded features, mapping an empty list to [`FetchOutcome::Empty`].
    pub fn from_features(features: Vec<Feature>) -> Self {
        if features.is_empty() {
            Self::Empty
        } else {
            Self::Features(features)
        }
    }

    pub fn feature_count(&self) -> usize {
        match self {
            Self::Features(features) => features.len(),
            _ => 0,
        }
    }
}
