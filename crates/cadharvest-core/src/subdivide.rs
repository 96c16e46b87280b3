use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::TileFetcher;
use crate::config::CategoryConfig;
use crate::diagnostics::Diagnostics;
use crate::domain::{Feature, Tile, TileLabel};
use crate::outcome::{ErrorKind, FetchFailure, FetchOutcome};

/// A piece of a tile that contributed nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileFailure {
    pub label: TileLabel,
    pub depth: u32,
    #[serde(flatten)]
    pub failure: FetchFailure,
}

/// What one tile's fetch-with-subdivision chain produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubdivisionReport {
    pub features: Vec<Feature>,
    /// Requests issued for the tile and all of its descendants.
    pub attempts: u32,
    /// Pieces that answered with features or with "no data".
    pub succeeded: u32,
    pub failures: Vec<TileFailure>,
    /// A cancellation stopped the chain before it finished.
    pub cancelled: bool,
}

impl SubdivisionReport {
    fn absorb(&mut self, other: SubdivisionReport) {
        self.features.extend(other.features);
        self.attempts += other.attempts;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

/// Fetches a tile, quartering it whenever the service times out.
///
/// Recursion stops at `max_depth`; a piece that still times out there is
/// dropped and recorded, never retried. Children are fetched one after
/// another inside the worker that owns the root tile.
#[derive(Clone)]
pub struct AdaptiveSubdivider {
    fetcher: Arc<dyn TileFetcher>,
    diagnostics: Arc<Diagnostics>,
}

impl AdaptiveSubdivider {
    pub fn new(fetcher: Arc<dyn TileFetcher>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            fetcher,
            diagnostics,
        }
    }

    pub fn fetch_with_subdivision<'a>(
        &'a self,
        tile: &'a Tile,
        category: &'a CategoryConfig,
        max_depth: u32,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = SubdivisionReport> + Send + 'a>> {
        Box::pin(async move {
            let mut report = SubdivisionReport::default();
            if cancel.is_cancelled() {
                debug!(tile = %tile.label, "cancelled before fetch");
                report.cancelled = true;
                return report;
            }

            report.attempts = 1;
            match self.fetcher.fetch_tile(tile, category, cancel).await {
                FetchOutcome::Features(features) => {
                    debug!(tile = %tile.label, depth = tile.depth, features = features.len(), "tile fetched");
                    report.features = features;
                    report.succeeded = 1;
                }
                FetchOutcome::Empty => {
                    debug!(tile = %tile.label, depth = tile.depth, "no data in tile");
                    report.succeeded = 1;
                }
                FetchOutcome::Cancelled => {
                    debug!(tile = %tile.label, "cancelled while fetching");
                    report.cancelled = true;
                }
                FetchOutcome::TimedOut if tile.depth < max_depth => {
                    let children = tile.quarter();
                    if children.is_empty() {
                        self.diagnostics.record_failure(ErrorKind::DepthExhausted);
                        self.drop_piece(
                            tile,
                            &mut report,
                            FetchFailure::new(ErrorKind::DepthExhausted, "timed out and cannot be split further"),
                        );
                        return report;
                    }

                    info!(
                        tile = %tile.label,
                        depth = tile.depth + 1,
                        max_depth,
                        children = children.len(),
                        "timeout, splitting tile 2x2"
                    );
                    for child in &children {
                        if cancel.is_cancelled() {
                            report.cancelled = true;
                            break;
                        }
                        let sub = self
                            .fetch_with_subdivision(child, category, max_depth, cancel)
                            .await;
                        report.absorb(sub);
                    }
                    info!(
                        tile = %tile.label,
                        features = report.features.len(),
                        "collected features from sub-tiles"
                    );
                }
                FetchOutcome::TimedOut => {
                    self.diagnostics.record_failure(ErrorKind::DepthExhausted);
                    self.drop_piece(
                        tile,
                        &mut report,
                        FetchFailure::new(
                            ErrorKind::DepthExhausted,
                            format!("still timing out at maximum depth {max_depth}"),
                        ),
                    );
                }
                FetchOutcome::Failed(failure) => {
                    self.drop_piece(tile, &mut report, failure);
                }
            }
            report
        })
    }

    fn drop_piece(&self, tile: &Tile, report: &mut SubdivisionReport, failure: FetchFailure) {
        warn!(
            tile = %tile.label,
            depth = tile.depth,
            error = failure.kind.code(),
            "dropping tile data: {}",
            failure.message
        );
        self.diagnostics.record_dropped_tile();
        report.failures.push(TileFailure {
            label: tile.label.clone(),
            depth: tile.depth,
            failure,
        });
    }
}
