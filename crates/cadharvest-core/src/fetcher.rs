use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CategoryConfig;
use crate::diagnostics::Diagnostics;
use crate::domain::{Feature, Tile, TileLabel};
use crate::outcome::{ErrorKind, FetchFailure};
use crate::subdivide::{AdaptiveSubdivider, SubdivisionReport, TileFailure};

/// How a root tile ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    /// Every piece answered.
    Complete,
    /// Some pieces answered, others were dropped.
    Partial,
    /// No piece answered.
    Failed,
    /// A wall-clock ceiling expired first.
    Abandoned,
    /// The job was cancelled before the tile finished.
    Cancelled,
}

impl TileStatus {
    pub const fn produced_result(self) -> bool {
        matches!(self, Self::Complete | Self::Partial)
    }
}

/// Result of one root tile.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub label: TileLabel,
    pub status: TileStatus,
    pub features: Vec<Feature>,
    pub attempts: u32,
    pub failures: Vec<TileFailure>,
    pub elapsed: Duration,
}

impl FetchResult {
    fn from_report(label: TileLabel, report: SubdivisionReport, elapsed: Duration) -> Self {
        let status = if report.succeeded > 0 && report.failures.is_empty() && !report.cancelled {
            TileStatus::Complete
        } else if report.succeeded > 0 {
            TileStatus::Partial
        } else if report.cancelled {
            TileStatus::Cancelled
        } else {
            TileStatus::Failed
        };

        Self {
            label,
            status,
            features: report.features,
            attempts: report.attempts,
            failures: report.failures,
            elapsed,
        }
    }

    fn unfinished(
        label: TileLabel,
        status: TileStatus,
        failure: Option<FetchFailure>,
        elapsed: Duration,
    ) -> Self {
        let failures = failure
            .map(|failure| {
                vec![TileFailure {
                    label: label.clone(),
                    depth: 0,
                    failure,
                }]
            })
            .unwrap_or_default();

        Self {
            label,
            status,
            features: Vec::new(),
            attempts: 0,
            failures,
            elapsed,
        }
    }
}

/// Wall-clock limits above the per-request deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCeilings {
    /// Whole fetch-with-subdivision chain of one root tile.
    pub tile: Duration,
    /// Every tile of the job.
    pub job: Duration,
}

impl Default for FetchCeilings {
    fn default() -> Self {
        Self {
            tile: Duration::from_secs(120),
            job: Duration::from_secs(30 * 60),
        }
    }
}

/// Bounded worker pool over the tiles of one job.
///
/// At most `category.max_workers` tiles are in flight. Each tile runs its
/// whole subdivision chain under the tile ceiling; one that overruns it is
/// abandoned and contributes nothing. Cancellation or the job ceiling stops
/// new tiles, sub-tiles and retries from starting and returns what has
/// completed without waiting for work still in flight.
#[derive(Clone)]
pub struct ParallelFetcher {
    subdivider: AdaptiveSubdivider,
    diagnostics: Arc<Diagnostics>,
    max_depth: u32,
    ceilings: FetchCeilings,
}

impl ParallelFetcher {
    pub fn new(
        subdivider: AdaptiveSubdivider,
        diagnostics: Arc<Diagnostics>,
        max_depth: u32,
        ceilings: FetchCeilings,
    ) -> Self {
        Self {
            subdivider,
            diagnostics,
            max_depth,
            ceilings,
        }
    }

    /// Results arrive in completion order.
    pub async fn fetch_all(
        &self,
        tiles: Vec<Tile>,
        category: &CategoryConfig,
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        let started = Instant::now();
        let job_timer = tokio::time::sleep(self.ceilings.job);
        tokio::pin!(job_timer);
        let job_token = cancel.child_token();
        let workers = Arc::new(Semaphore::new(category.max_workers.max(1)));
        let category = Arc::new(category.clone());

        let mut pending = BTreeSet::new();
        let mut tasks = JoinSet::new();
        info!(
            category = category.id,
            tiles = tiles.len(),
            workers = category.max_workers,
            "fetching tiles"
        );

        for tile in tiles {
            pending.insert(tile.label.clone());
            let workers = Arc::clone(&workers);
            let category = Arc::clone(&category);
            let token = job_token.clone();
            let subdivider = self.subdivider.clone();
            let diagnostics = Arc::clone(&self.diagnostics);
            let max_depth = self.max_depth;
            let tile_ceiling = self.ceilings.tile;

            tasks.spawn(async move {
                let queued = Instant::now();
                let permit = tokio::select! {
                    permit = workers.acquire_owned() => permit.ok(),
                    () = token.cancelled() => None,
                };
                let Some(_permit) = permit else {
                    return FetchResult::unfinished(tile.label, TileStatus::Cancelled, None, queued.elapsed());
                };
                if token.is_cancelled() {
                    return FetchResult::unfinished(tile.label, TileStatus::Cancelled, None, queued.elapsed());
                }

                let started = Instant::now();
                let chain = subdivider.fetch_with_subdivision(&tile, &category, max_depth, &token);
                let finished = tokio::time::timeout(tile_ceiling, chain).await;
                match finished {
                    Ok(report) => FetchResult::from_report(tile.label, report, started.elapsed()),
                    Err(_) => {
                        warn!(
                            tile = %tile.label,
                            ceiling_s = tile_ceiling.as_secs(),
                            "tile exceeded its wall-clock ceiling, abandoning it"
                        );
                        diagnostics.record_failure(ErrorKind::TileAbandoned);
                        diagnostics.record_dropped_tile();
                        FetchResult::unfinished(
                            tile.label,
                            TileStatus::Abandoned,
                            Some(FetchFailure::new(
                                ErrorKind::TileAbandoned,
                                format!("exceeded the {}s tile ceiling", tile_ceiling.as_secs()),
                            )),
                            started.elapsed(),
                        )
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        let mut stop: Option<TileStatus> = None;
        while !tasks.is_empty() {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => {
                        debug!(tile = %result.label, status = ?result.status, features = result.features.len(), "tile finished");
                        pending.remove(&result.label);
                        results.push(result);
                    }
                    Some(Err(error)) => warn!(error = %error, "tile worker panicked"),
                    None => break,
                },
                () = cancel.cancelled() => {
                    info!(unfinished = pending.len(), "job cancelled, detaching in-flight tiles");
                    stop = Some(TileStatus::Cancelled);
                    break;
                }
                () = &mut job_timer => {
                    warn!(
                        unfinished = pending.len(),
                        ceiling_s = self.ceilings.job.as_secs(),
                        "job exceeded its wall-clock ceiling, detaching in-flight tiles"
                    );
                    stop = Some(TileStatus::Abandoned);
                    break;
                }
            }
        }

        if let Some(status) = stop {
            job_token.cancel();
            tasks.detach_all();
            for label in std::mem::take(&mut pending) {
                let failure = (status == TileStatus::Abandoned).then(|| {
                    self.diagnostics.record_failure(ErrorKind::JobTimedOut);
                    self.diagnostics.record_dropped_tile();
                    FetchFailure::new(ErrorKind::JobTimedOut, "job ceiling reached before the tile finished")
                });
                results.push(FetchResult::unfinished(label, status, failure, started.elapsed()));
            }
        } else {
            for label in std::mem::take(&mut pending) {
                self.diagnostics.record_dropped_tile();
                results.push(FetchResult::unfinished(
                    label,
                    TileStatus::Failed,
                    Some(FetchFailure::new(ErrorKind::TileAbandoned, "tile worker panicked")),
                    started.elapsed(),
                ));
            }
        }

        results
    }
}
