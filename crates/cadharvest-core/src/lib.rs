//! # Cadharvest Core
//!
//! Adaptive, rate-limited harvesting engine for cadastral vector datasets.
//!
//! ## Overview
//!
//! The remote service answers one query per polygon and times out on large or
//! dense areas. This crate turns "every feature of a category inside a region"
//! into a bounded set of requests that the service will actually answer:
//!
//! - **Partitioning** of large regions into a grid of region-clipped tiles
//! - **Adaptive subdivision** of tiles that time out, down to a depth limit
//! - **Rate limiting** across every worker of the process
//! - **Retries with backoff** for transient failures, with a block guard for
//!   repeated `403` answers
//! - **Response caching** keyed by the exact request payload
//! - **Assembly** of tile results into one de-duplicated collection
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`assemble`] | De-duplication and ordering of harvested features |
//! | [`cache`] | TTL response cache |
//! | [`circuit_breaker`] | Block guard for repeated `403` answers |
//! | [`client`] | Retrying, rate-limited, cached HTTP client |
//! | [`config`] | Service and category configuration, catalog loading |
//! | [`diagnostics`] | Failure and request counters |
//! | [`domain`] | Geometry, feature, region and tile types |
//! | [`error`] | Validation and job errors |
//! | [`fetcher`] | Bounded worker pool over the tiles of a job |
//! | [`harvester`] | Job entry point and builder |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`outcome`] | Per-request outcomes and failure kinds |
//! | [`partition`] | Area-based grid partitioning |
//! | [`report`] | Job report |
//! | [`retry`] | Backoff schedules |
//! | [`spatial`] | Projections, areas and grid intersections |
//! | [`subdivide`] | Timeout-driven quartering |
//! | [`throttling`] | Sliding-window rate limiter |
//! | [`wire`] | Request payload and response decoding |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadharvest_core::{CategoryConfig, Crs, Harvester, QueryRegion, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harvester = Harvester::builder(ServiceConfig::new("https://cadastre.example/api/features"))
//!         .build()?;
//!
//!     let region = QueryRegion::from_geojson(&serde_json::from_str(REGION)?, Crs::Wgs84)?;
//!     let parcels = CategoryConfig::new(36368, "parcels").with_split_threshold(Some(25.0));
//!
//!     let report = harvester.fetch_dataset(&region, &parcels).await?;
//!     println!("{} features, {} retries", report.features.len(), report.diagnostics.retries);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Harvester      │──▶ AreaPartitioner ──▶ tiles
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ ParallelFetcher │────▶│ AdaptiveSubdiv.  │
//! │ (JoinSet + sem) │     │ (split timeouts) │
//! └─────────────────┘     └────────┬─────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ RateLimiter     │◀────│ RetryingHttp     │──▶ ResponseCache
//! │ BlockGuard      │     │ Client           │
//! └─────────────────┘     └────────┬─────────┘
//!                                  │
//!                                  ▼
//!                         ┌──────────────────┐
//!                         │ HttpClient       │
//!                         │ (reqwest)        │
//!                         └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Invalid input is rejected with [`ValidationError`] before any request is
//! made. Once a job is running, per-tile failures never abort it; they are
//! counted in the report's diagnostics. Only a job in which no tile produced
//! a result fails, with [`HarvestError::AllTilesFailed`]:
//!
//! ```rust,ignore
//! match harvester.fetch_dataset(&region, &category).await {
//!     Ok(report) if report.is_complete() => {}
//!     Ok(report) => eprintln!("partial: {:?}", report.diagnostics.failures),
//!     Err(error) => eprintln!("{}: {error}", error.code()),
//! }
//! ```

pub mod assemble;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod harvester;
pub mod http_client;
pub mod outcome;
pub mod partition;
pub mod report;
pub mod retry;
pub mod spatial;
pub mod subdivide;
pub mod throttling;
pub mod wire;

// Assembly
pub use assemble::{Assembly, FeatureAssembler};

// Caching
pub use cache::{CacheMode, ResponseCache};

// Block guard
pub use circuit_breaker::{BlockGuard, BlockGuardConfig, GuardState};

// Client
pub use client::{RetryingHttpClient, TileFetcher};

// Configuration
pub use config::{Catalog, CatalogError, CategoryConfig, ServiceConfig, TimeoutSchedule};

// Diagnostics
pub use diagnostics::{Diagnostics, DiagnosticsSummary};

// Domain models
pub use domain::{
    AttributeValue, Attributes, Crs, ExternalId, Feature, FeatureCollection, Geometry,
    GeometryKind, Position, QueryRegion, Tile, TileLabel,
};

// Error types
pub use error::{HarvestError, ValidationError};

// Parallel fetching
pub use fetcher::{FetchCeilings, FetchResult, ParallelFetcher, TileStatus};

// Entry point
pub use harvester::{Harvester, HarvesterBuilder};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Outcomes
pub use outcome::{ErrorKind, FetchFailure, FetchOutcome};

// Partitioning
pub use partition::AreaPartitioner;

// Reports
pub use report::{CategorySummary, HarvestReport, JobId, TileReport};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Subdivision
pub use subdivide::{AdaptiveSubdivider, SubdivisionReport, TileFailure};

// Throttling
pub use throttling::RateLimiter;

// Wire format
pub use wire::{decode_response, DecodedPage, RequestPayload, RESPONSE_CRS};
