//! Category and service configuration.
//!
//! Catalog files follow the endpoint table format used by the cadastral
//! service tooling, which is loose about types: thresholds and counts may be
//! numbers, numeric strings, `null` or the string `"null"`, and timeouts may be
//! a progressive `"3;10;30"` schedule.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::retry::{Backoff, RetryConfig};
use crate::ValidationError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_WORKERS: usize = 5;

pub const ENDPOINT_URL_ENV: &str = "CADHARVEST_ENDPOINT_URL";
pub const REFERER_ENV: &str = "CADHARVEST_REFERER";

/// Per-attempt timeouts; attempt `k` uses `timeouts[min(k, len - 1)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSchedule(Vec<Duration>);

impl TimeoutSchedule {
    pub fn new(timeouts: Vec<Duration>) -> Result<Self, ValidationError> {
        if timeouts.is_empty() || timeouts.iter().any(Duration::is_zero) {
            return Err(ValidationError::EmptyTimeoutSchedule);
        }
        Ok(Self(timeouts))
    }

    pub fn single(timeout: Duration) -> Self {
        Self(vec![timeout])
    }

    /// Parses `"30"` or `"3;10;30"` (seconds).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let timeouts = input
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| parse_seconds(part))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(timeouts)
    }

    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.0.len() - 1);
        self.0[index]
    }

    pub fn longest(&self) -> Duration {
        self.0.iter().copied().max().unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn as_slice(&self) -> &[Duration] {
        &self.0
    }
}

impl Default for TimeoutSchedule {
    fn default() -> Self {
        Self::single(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Serialize for TimeoutSchedule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let seconds: Vec<f64> = self.0.iter().map(Duration::as_secs_f64).collect();
        seconds.serialize(serializer)
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidTimeout {
        value: raw.to_owned(),
    };
    let seconds: f64 = raw.trim().parse().map_err(|_| invalid())?;
    seconds_to_duration(seconds).ok_or_else(invalid)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

/// Dataset type requested from the service plus how to fetch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCategory")]
pub struct CategoryConfig {
    pub id: u64,
    pub name: String,
    /// `None` disables splitting.
    pub split_threshold_km2: Option<f64>,
    #[serde(rename = "timeout_sec")]
    pub timeouts: TimeoutSchedule,
    pub max_retries: u32,
    pub max_workers: usize,
}

impl CategoryConfig {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            split_threshold_km2: None,
            timeouts: TimeoutSchedule::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    pub fn with_split_threshold(mut self, threshold_km2: Option<f64>) -> Self {
        self.split_threshold_km2 = threshold_km2;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutSchedule) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_workers == 0 {
            return Err(ValidationError::ZeroWorkers {
                category: self.name.clone(),
            });
        }
        if let Some(threshold) = self.split_threshold_km2 {
            if !(threshold.is_finite() && threshold > 0.0) {
                return Err(ValidationError::InvalidSplitThreshold { value: threshold });
            }
        }
        Ok(())
    }

    pub fn retry_config(&self, backoff: Backoff) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(f64),
    List(Vec<f64>),
    Text(String),
}

impl Loose {
    fn is_null_text(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty() || text.trim() == "null")
    }
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    #[serde(alias = "category_id")]
    id: u64,
    #[serde(default, alias = "category_name")]
    name: Option<String>,
    #[serde(default)]
    split_threshold_km2: Option<Loose>,
    #[serde(default, alias = "timeouts")]
    timeout_sec: Option<Loose>,
    #[serde(default)]
    max_retries: Option<Loose>,
    #[serde(default)]
    max_workers: Option<Loose>,
}

impl TryFrom<RawCategory> for CategoryConfig {
    type Error = ValidationError;

    fn try_from(raw: RawCategory) -> Result<Self, Self::Error> {
        let split_threshold_km2 = match raw.split_threshold_km2 {
            None => None,
            Some(value) if value.is_null_text() => None,
            Some(Loose::Number(value)) => Some(value),
            // A progressive threshold list only drives the first split here.
            Some(Loose::List(values)) => values.first().copied(),
            Some(Loose::Text(text)) => {
                let first = text.split(';').next().unwrap_or_default().trim();
                Some(first.parse::<f64>().map_err(|_| {
                    ValidationError::InvalidSplitThreshold { value: f64::NAN }
                })?)
            }
        };

        let timeouts = match raw.timeout_sec {
            None => TimeoutSchedule::default(),
            Some(value) if value.is_null_text() => TimeoutSchedule::default(),
            Some(Loose::Number(seconds)) => TimeoutSchedule::single(
                seconds_to_duration(seconds).ok_or_else(|| ValidationError::InvalidTimeout {
                    value: seconds.to_string(),
                })?,
            ),
            Some(Loose::List(values)) => TimeoutSchedule::new(
                values
                    .into_iter()
                    .map(|seconds| {
                        seconds_to_duration(seconds).ok_or_else(|| {
                            ValidationError::InvalidTimeout {
                                value: seconds.to_string(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            )?,
            Some(Loose::Text(text)) => TimeoutSchedule::parse(&text)?,
        };

        let id = raw.id;
        let category = Self {
            id,
            name: raw.name.unwrap_or_else(|| id.to_string()),
            split_threshold_km2,
            timeouts,
            max_retries: loose_count(raw.max_retries)?
                .map(narrow_count)
                .transpose()?
                .unwrap_or(DEFAULT_MAX_RETRIES),
            max_workers: loose_count(raw.max_workers)?
                .map(narrow_count)
                .transpose()?
                .unwrap_or(DEFAULT_MAX_WORKERS),
        };
        category.validate()?;
        Ok(category)
    }
}

fn narrow_count<T: TryFrom<u64>>(value: u64) -> Result<T, ValidationError> {
    T::try_from(value).map_err(|_| ValidationError::InvalidCount {
        value: value.to_string(),
    })
}

fn loose_count(value: Option<Loose>) -> Result<Option<u64>, ValidationError> {
    let invalid = |value: String| ValidationError::InvalidCount { value };
    match value {
        None => Ok(None),
        Some(value) if value.is_null_text() => Ok(None),
        Some(Loose::Number(number))
            if number >= 0.0 && number.fract() == 0.0 && number < u64::MAX as f64 =>
        {
            Ok(Some(number as u64))
        }
        Some(Loose::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(text)),
        Some(Loose::Number(number)) => Err(invalid(number.to_string())),
        Some(Loose::List(values)) => Err(invalid(format!("{values:?}"))),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {seconds}"
            ))
        })
    }
}

/// Connection, pacing and ceiling settings shared by every category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoint_url: String,
    pub referer: Option<String>,
    pub user_agent: String,
    #[serde(with = "duration_secs", rename = "connect_timeout_sec")]
    pub connect_timeout: Duration,
    /// Added to each attempt timeout before the call is abandoned.
    #[serde(with = "duration_secs", rename = "deadline_grace_sec")]
    pub deadline_grace: Duration,
    pub requests_per_second: u32,
    pub max_subdivision_depth: u32,
    #[serde(with = "duration_secs", rename = "tile_ceiling_sec")]
    pub tile_ceiling: Duration,
    #[serde(with = "duration_secs", rename = "job_ceiling_sec")]
    pub job_ceiling: Duration,
    #[serde(with = "duration_secs", rename = "cache_ttl_sec")]
    pub cache_ttl: Duration,
    #[serde(with = "duration_secs", rename = "backoff_base_sec")]
    pub backoff_base: Duration,
    #[serde(with = "duration_secs", rename = "backoff_max_sec")]
    pub backoff_max: Duration,
    #[serde(with = "duration_secs", rename = "backoff_jitter_sec")]
    pub backoff_jitter: Duration,
    pub forbidden_threshold: u32,
    #[serde(with = "duration_secs", rename = "block_cool_down_sec")]
    pub block_cool_down: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            referer: None,
            user_agent: format!("cadharvest/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            deadline_grace: Duration::from_secs(5),
            requests_per_second: 10,
            max_subdivision_depth: 3,
            tile_ceiling: Duration::from_secs(120),
            job_ceiling: Duration::from_secs(30 * 60),
            cache_ttl: Duration::from_secs(3_600),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: Duration::from_secs(1),
            forbidden_threshold: 3,
            block_cool_down: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Replaces the endpoint and referer with `CADHARVEST_ENDPOINT_URL` and
    /// `CADHARVEST_REFERER` when they are set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var(ENDPOINT_URL_ENV) {
            if !url.trim().is_empty() {
                self.endpoint_url = url;
            }
        }
        if let Ok(referer) = env::var(REFERER_ENV) {
            if !referer.trim().is_empty() {
                self.referer = Some(referer);
            }
        }
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: self.backoff_base,
            factor: 2.0,
            max: self.backoff_max,
            jitter: self.backoff_jitter,
        }
    }

    /// `scheme://host[:port]` of the referer, or the referer itself when it has
    /// no recognizable authority.
    pub fn origin(&self) -> Option<String> {
        let referer = self.referer.as_deref()?;
        Some(match referer.split_once("://") {
            Some((scheme, rest)) => {
                let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
                if authority.is_empty() {
                    referer.to_owned()
                } else {
                    format!("{scheme}://{authority}")
                }
            }
            None => referer.to_owned(),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ValidationError::EmptyEndpoint);
        }
        if self.requests_per_second == 0 {
            return Err(ValidationError::ZeroRateLimit);
        }
        if self.tile_ceiling >= self.job_ceiling {
            return Err(self.ceiling_error(Duration::ZERO));
        }
        Ok(())
    }

    /// The slowest single attempt of `category`, forced deadline included,
    /// must finish inside the tile ceiling, which must finish inside the job
    /// ceiling.
    pub fn validate_ceilings(&self, category: &CategoryConfig) -> Result<(), ValidationError> {
        let attempt = category.timeouts.longest().saturating_add(self.deadline_grace);
        if attempt < self.tile_ceiling && self.tile_ceiling < self.job_ceiling {
            Ok(())
        } else {
            Err(self.ceiling_error(attempt))
        }
    }

    fn ceiling_error(&self, attempt: Duration) -> ValidationError {
        ValidationError::CeilingOrder {
            attempt_ms: attempt.as_millis(),
            tile_ms: self.tile_ceiling.as_millis(),
            job_ms: self.job_ceiling.as_millis(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Service settings plus every category that may be harvested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default, alias = "endpoints")]
    pub categories: Vec<CategoryConfig>,
}

impl Catalog {
    /// Reads a JSON catalog and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog = Self::from_json(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        catalog.service = catalog.service.with_env_overrides();
        catalog.service.validate()?;
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Finds a category by numeric id or case-insensitive name.
    pub fn category(&self, key: &str) -> Result<&CategoryConfig, ValidationError> {
        let key = key.trim();
        let by_id = key.parse::<u64>().ok();
        self.categories
            .iter()
            .find(|category| {
                Some(category.id) == by_id || category.name.eq_ignore_ascii_case(key)
            })
            .ok_or_else(|| ValidationError::UnknownCategory {
                value: key.to_owned(),
            })
    }
}
