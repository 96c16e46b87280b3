//! Test doubles shared by the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cadharvest_core::{
    CategoryConfig, Crs, Feature, FetchOutcome, Geometry, Harvester, HttpClient, HttpError,
    HttpRequest, HttpResponse, Position, QueryRegion, ServiceConfig, Tile, TileFetcher, TileLabel,
};
use geo::{polygon, MultiPolygon};
use tokio_util::sync::CancellationToken;

pub const ENDPOINT: &str = "https://cadastre.example/api/features";

/// Web Mercator origin of the synthetic regions, roughly central Moscow.
pub const ORIGIN: (f64, f64) = (4_180_000.0, 7_480_000.0);

pub fn service() -> ServiceConfig {
    ServiceConfig::new(ENDPOINT).with_referer("https://cadastre.example/map/")
}

pub fn category() -> CategoryConfig {
    CategoryConfig::new(36368, "parcels")
}

/// Axis-aligned rectangle in Web Mercator metres.
pub fn rectangle(width_m: f64, height_m: f64) -> QueryRegion {
    let (x, y) = ORIGIN;
    QueryRegion::new(
        MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + width_m, y: y),
            (x: x + width_m, y: y + height_m),
            (x: x, y: y + height_m),
            (x: x, y: y),
        ]]),
        Crs::WebMercator,
    )
    .expect("valid rectangle")
}

pub fn square_km2(area_km2: f64) -> QueryRegion {
    let side = (area_km2 * 1_000_000.0).sqrt();
    rectangle(side, side)
}

pub fn feature(id: &str) -> Feature {
    Feature::new(id, Geometry::Point(Position::new(37.62, 55.75)))
}

/// Response body carrying one point feature per id.
pub fn page(ids: &[&str]) -> String {
    let features: Vec<_> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [37.62, 55.75]},
                "properties": {"interactionId": id, "options": {"cad_num": id}},
            })
        })
        .collect();
    serde_json::json!({"type": "FeatureCollection", "features": features}).to_string()
}

/// Transport that replays a fixed list of replies, then answers with an
/// empty collection.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    fallback: Option<HttpResponse>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers every request with `response`.
    pub fn always(response: HttpResponse) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        _request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| HttpResponse::ok_json("{}")))
            });
        Box::pin(async move { reply })
    }
}

/// Tile fetcher driven by a closure. `None` never completes, like a service
/// that accepted the connection and went silent.
pub struct FnFetcher<F> {
    respond: F,
    attempts: AtomicU32,
    seen: Mutex<Vec<TileLabel>>,
}

impl<F> FnFetcher<F>
where
    F: Fn(&Tile) -> Option<FetchOutcome> + Send + Sync + 'static,
{
    pub fn new(respond: F) -> Arc<Self> {
        Arc::new(Self {
            respond,
            attempts: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<TileLabel> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl<F> TileFetcher for FnFetcher<F>
where
    F: Fn(&Tile) -> Option<FetchOutcome> + Send + Sync,
{
    fn fetch_tile<'a>(
        &'a self,
        tile: &'a Tile,
        _category: &'a CategoryConfig,
        _cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("seen lock").push(tile.label.clone());
        let reply = (self.respond)(tile);
        Box::pin(async move {
            match reply {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        })
    }
}

pub fn harvester_with_fetcher(fetcher: Arc<dyn TileFetcher>, service: ServiceConfig) -> Harvester {
    Harvester::builder(service)
        .tile_fetcher(fetcher)
        .build()
        .expect("harvester")
}

pub fn harvester_with_transport(
    transport: Arc<ScriptedTransport>,
    service: ServiceConfig,
) -> Harvester {
    Harvester::builder(service)
        .transport(transport)
        .build()
        .expect("harvester")
}
