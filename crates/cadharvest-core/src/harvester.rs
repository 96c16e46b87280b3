use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assemble::FeatureAssembler;
use crate::cache::{CacheMode, ResponseCache};
use crate::circuit_breaker::{BlockGuard, BlockGuardConfig};
use crate::client::{RetryingHttpClient, TileFetcher};
use crate::config::{CategoryConfig, ServiceConfig};
use crate::diagnostics::Diagnostics;
use crate::domain::{QueryRegion, Tile};
use crate::error::HarvestError;
use crate::fetcher::{FetchCeilings, ParallelFetcher};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::partition::AreaPartitioner;
use crate::report::{CategorySummary, HarvestReport, JobId, TileReport};
use crate::subdivide::AdaptiveSubdivider;
use crate::throttling::RateLimiter;
use crate::wire::RESPONSE_CRS;
use crate::ValidationError;

/// Entry point: harvests every feature of a category inside a region.
///
/// A harvester owns the process-wide pieces (rate limiter, response cache,
/// block guard, diagnostics) and is meant to be created once and reused for
/// many jobs. Jobs share the rate limit and the cache; each job owns nothing
/// beyond its own call.
#[derive(Clone)]
pub struct Harvester {
    service: Arc<ServiceConfig>,
    fetcher: ParallelFetcher,
    partitioner: AreaPartitioner,
    assembler: FeatureAssembler,
    diagnostics: Arc<Diagnostics>,
}

impl Harvester {
    pub fn builder(service: ServiceConfig) -> HarvesterBuilder {
        HarvesterBuilder::new(service)
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Tiles a job would fetch, without fetching anything.
    pub fn plan(
        &self,
        region: &QueryRegion,
        category: &CategoryConfig,
    ) -> Result<Vec<Tile>, ValidationError> {
        category.validate()?;
        self.partitioner
            .partition(region, category.split_threshold_km2)
    }

    pub async fn fetch_dataset(
        &self,
        region: &QueryRegion,
        category: &CategoryConfig,
    ) -> Result<HarvestReport, HarvestError> {
        self.fetch_dataset_with_cancel(region, category, &CancellationToken::new())
            .await
    }

    /// Runs one job. Cancelling `cancel` stops new requests from starting and
    /// returns the features gathered so far.
    pub async fn fetch_dataset_with_cancel(
        &self,
        region: &QueryRegion,
        category: &CategoryConfig,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport, HarvestError> {
        category.validate()?;
        self.service.validate_ceilings(category)?;

        let job_id = JobId::new_v4();
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        let baseline = self.diagnostics.snapshot();

        let tiles = self
            .partitioner
            .partition(region, category.split_threshold_km2)?;
        let planned_tiles = tiles.len();
        info!(
            job = %job_id,
            category = category.id,
            name = %category.name,
            area_km2 = region.area_km2(),
            tiles = planned_tiles,
            "job started"
        );

        let results = self.fetcher.fetch_all(tiles, category, cancel).await;

        let mut tile_reports: Vec<TileReport> = results.iter().map(TileReport::from).collect();
        tile_reports.sort_by_cached_key(|tile| tile.label.segments());
        let any_result = results.iter().any(|result| result.status.produced_result());

        let assembly = self
            .assembler
            .assemble(results.into_iter().flat_map(|result| result.features));
        self.diagnostics.record_duplicates(assembly.duplicates_removed);

        let diagnostics = self.diagnostics.since(&baseline);
        let cancelled = cancel.is_cancelled();

        if planned_tiles > 0 && !any_result && !cancelled {
            warn!(job = %job_id, failures = diagnostics.failure_total(), "no tile produced a result");
            return Err(HarvestError::AllTilesFailed { diagnostics });
        }

        let report = HarvestReport {
            job_id,
            category: CategorySummary {
                id: category.id,
                name: category.name.clone(),
            },
            crs: RESPONSE_CRS,
            region_crs: region.crs(),
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            planned_tiles,
            tiles: tile_reports,
            cancelled,
            diagnostics,
            features: assembly.collection,
        };

        info!(
            job = %job_id,
            features = report.features.len(),
            duplicates_removed = report.diagnostics.duplicates_removed,
            succeeded_tiles = report.succeeded_tiles(),
            planned_tiles,
            cancelled,
            elapsed_ms = report.elapsed_ms,
            "job finished"
        );
        Ok(report)
    }
}

/// Wires a [`Harvester`] from its collaborators. Anything not supplied is
/// built from the [`ServiceConfig`].
pub struct HarvesterBuilder {
    service: ServiceConfig,
    transport: Option<Arc<dyn HttpClient>>,
    tile_fetcher: Option<Arc<dyn TileFetcher>>,
    limiter: Option<Arc<RateLimiter>>,
    cache: Option<ResponseCache>,
    cache_mode: CacheMode,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl HarvesterBuilder {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service,
            transport: None,
            tile_fetcher: None,
            limiter: None,
            cache: None,
            cache_mode: CacheMode::default(),
            diagnostics: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the HTTP stack entirely.
    pub fn tile_fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.tile_fetcher = Some(fetcher);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn build(self) -> Result<Harvester, ValidationError> {
        let service = Arc::new(self.service);
        let diagnostics = self.diagnostics.unwrap_or_default();

        let fetcher: Arc<dyn TileFetcher> = match self.tile_fetcher {
            Some(fetcher) => fetcher,
            None => {
                service.validate()?;
                let limiter = match self.limiter {
                    Some(limiter) => limiter,
                    None => Arc::new(RateLimiter::new(service.requests_per_second)?),
                };
                let transport = self.transport.unwrap_or_else(|| {
                    Arc::new(ReqwestHttpClient::new(
                        &service.user_agent,
                        service.connect_timeout,
                    ))
                });
                let guard = Arc::new(BlockGuard::new(BlockGuardConfig {
                    forbidden_threshold: service.forbidden_threshold.max(1),
                    cool_down: service.block_cool_down,
                }));
                let cache = self
                    .cache
                    .unwrap_or_else(|| ResponseCache::new(service.cache_ttl));

                Arc::new(
                    RetryingHttpClient::new(
                        transport,
                        limiter,
                        cache,
                        guard,
                        Arc::clone(&diagnostics),
                        Arc::clone(&service),
                    )
                    .with_cache_mode(self.cache_mode),
                )
            }
        };

        let subdivider = AdaptiveSubdivider::new(fetcher, Arc::clone(&diagnostics));
        let fetcher = ParallelFetcher::new(
            subdivider,
            Arc::clone(&diagnostics),
            service.max_subdivision_depth,
            FetchCeilings {
                tile: service.tile_ceiling,
                job: service.job_ceiling,
            },
        );

        Ok(Harvester {
            service,
            fetcher,
            partitioner: AreaPartitioner::new(),
            assembler: FeatureAssembler::new(),
            diagnostics,
        })
    }
}
