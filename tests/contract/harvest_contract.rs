//! Wire and report contracts that downstream consumers rely on.

#[path = "../support/mod.rs"]
mod support;

use cadharvest_core::{
    decode_response, AttributeValue, Catalog, Crs, ErrorKind, ExternalId, FeatureCollection,
    FetchOutcome, Geometry, GeometryKind, Position, QueryRegion, RequestPayload, Tile, TileFetcher,
    RESPONSE_CRS,
};
use geo::{polygon, MultiPolygon};
use serde_json::{json, Value};

use support::{category, feature, harvester_with_fetcher, service, square_km2, FnFetcher};

// =============================================================================
// Error taxonomy
// =============================================================================

#[test]
fn error_codes_are_stable() {
    let codes: Vec<_> = ErrorKind::ALL.iter().map(|kind| kind.code()).collect();
    assert_eq!(
        codes,
        [
            "fetch.rate_limited",
            "fetch.forbidden",
            "fetch.timeout",
            "fetch.connection_failure",
            "fetch.tls_failure",
            "fetch.server_error",
            "fetch.malformed_response",
            "fetch.unexpected_status",
            "fetch.invalid_request",
            "fetch.tile_abandoned",
            "fetch.depth_exhausted",
            "fetch.job_timed_out",
        ]
    );
}

#[test]
fn only_transient_failures_are_retryable() {
    let retryable: Vec<_> = ErrorKind::ALL
        .into_iter()
        .filter(|kind| kind.retryable())
        .collect();
    assert_eq!(
        retryable,
        [
            ErrorKind::RateLimited,
            ErrorKind::ConnectionFailure,
            ErrorKind::TlsFailure,
            ErrorKind::ServerError,
        ]
    );
}

// =============================================================================
// Request payload
// =============================================================================

#[test]
fn payload_wraps_the_geometry_in_a_feature_collection() {
    let payload = RequestPayload::new(36368, Geometry::Point(Position::new(37.6, 55.7)));
    let body: Value = serde_json::from_str(&payload.to_json().expect("encode")).expect("json");

    assert_eq!(
        body,
        json!({
            "categories": [{"id": 36368}],
            "geom": {
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [37.6, 55.7]},
                    "properties": {}
                }]
            }
        })
    );
}

#[test]
fn same_tile_yields_the_same_cache_key() {
    let tile = Tile::whole(&square_km2(3.0));
    let first = RequestPayload::for_tile(36368, &tile).cache_key().expect("key");
    let second = RequestPayload::for_tile(36368, &tile.clone()).cache_key().expect("key");
    let other_category = RequestPayload::for_tile(36369, &tile).cache_key().expect("key");

    assert_eq!(first, second);
    assert_ne!(first, other_category);
}

// =============================================================================
// Response decoding
// =============================================================================

#[test]
fn service_page_decodes_mixed_features_and_skips_unusable_ones() {
    let body = json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[[37.0, 55.0], [37.1, 55.0], [37.1, 55.1], [37.0, 55.0]]]},
                "properties": {
                    "interactionId": 130_442_819,
                    "options": {
                        "cad_num": "77:01:0001001:23",
                        "area": 1520.5,
                        "floors": 3,
                        "owners": ["city", "district"],
                        "address": {"street": "Tverskaya"},
                        "note": null
                    }
                }
            },
            {
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[37.0, 55.0, 140.0], [37.2, 55.2, 141.0]]},
                "properties": {"interactionId": "line-7", "kind": "fence"}
            },
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [37.0, 55.0]}, "properties": {}},
            {"type": "Feature", "geometry": null, "properties": {"interactionId": "no-geometry"}}
        ]
    })
    .to_string();

    let page = decode_response(&body).expect("decodes");

    assert_eq!(page.features.len(), 2);
    assert_eq!(page.skipped, 2);

    let parcel = &page.features[0];
    assert_eq!(parcel.id, ExternalId::from("130442819"));
    assert_eq!(parcel.geometry.kind(), GeometryKind::Polygon);
    assert_eq!(parcel.attributes["floors"], AttributeValue::Integer(3));
    assert_eq!(parcel.attributes["area"], AttributeValue::Float(1520.5));
    assert_eq!(parcel.attributes["owners"], AttributeValue::Text("city; district".into()));
    assert_eq!(
        parcel.attributes["address"],
        AttributeValue::Text(r#"{"street":"Tverskaya"}"#.into())
    );
    assert_eq!(parcel.attributes["note"], AttributeValue::Null);

    let line = &page.features[1];
    assert_eq!(line.geometry.kind(), GeometryKind::LineString);
    assert_eq!(line.attributes["kind"], AttributeValue::Text("fence".into()));
    assert!(!line.attributes.contains_key("interactionId"));
}

#[test]
fn empty_answers_are_not_malformed() {
    for body in ["", "   ", "{}", r#"{"features": null}"#, r#"{"features": []}"#] {
        let page = decode_response(body).expect("empty answer decodes");
        assert!(page.features.is_empty(), "body {body:?}");
    }
    assert!(decode_response(r#"{"features": 3}"#).is_err());
    assert!(decode_response("<html>").is_err());
}

// =============================================================================
// Output documents
// =============================================================================

#[test]
fn feature_collection_serializes_as_geojson() {
    let collection = FeatureCollection::new(vec![feature("77:01:0001:23")
        .with_attribute("cad_num", AttributeValue::Text("77:01:0001:23".into()))]);

    let document = serde_json::to_value(&collection).expect("serialize");

    assert_eq!(document["type"], "FeatureCollection");
    let first = &document["features"][0];
    assert_eq!(first["type"], "Feature");
    assert_eq!(first["id"], "77:01:0001:23");
    assert_eq!(first["geometry"]["type"], "Point");
    assert_eq!(first["properties"]["interactionId"], "77:01:0001:23");
    assert_eq!(first["properties"]["cad_num"], "77:01:0001:23");
}

#[tokio::test(start_paused = true)]
async fn report_carries_job_identity_and_timing() {
    let harvester = harvester_with_fetcher(
        FnFetcher::new(|_: &Tile| {
            Some(FetchOutcome::Features(vec![feature("a")]))
        }) as std::sync::Arc<dyn TileFetcher>,
        service(),
    );

    let report = harvester
        .fetch_dataset(&square_km2(2.0), &category())
        .await
        .expect("job succeeds");
    let document = serde_json::to_value(&report).expect("serialize");

    let job_id = document["job_id"].as_str().expect("job id");
    assert_eq!(job_id.len(), 36);
    assert_eq!(job_id, report.job_id.to_string());
    let started_at = document["started_at"].as_str().expect("start time");
    assert!(started_at.contains('T') && started_at.ends_with('Z'), "{started_at}");
    assert_eq!(document["category"], json!({"id": 36368, "name": "parcels"}));
    assert_eq!(document["crs"], "EPSG:3857");
    assert_eq!(document["region_crs"], "EPSG:3857");
    assert_eq!(document["planned_tiles"], 1);
    assert_eq!(document["tiles"][0]["label"], "1");
    assert_eq!(document["tiles"][0]["status"], "complete");
    assert_eq!(document["features"]["type"], "FeatureCollection");
    assert_eq!(document["diagnostics"]["failures"], json!({}));
}

// =============================================================================
// Catalog
// =============================================================================

#[test]
fn catalog_accepts_loose_category_values() {
    let catalog = Catalog::from_json(
        r#"{
            "service": {"endpoint_url": "https://cadastre.example/api/features", "requests_per_second": 4},
            "endpoints": [
                {"category_id": 36368, "category_name": "parcels", "split_threshold_km2": 25,
                 "timeout_sec": "3;10;30", "max_retries": "5", "max_workers": 8},
                {"category_id": 36369, "category_name": "buildings", "split_threshold_km2": "null",
                 "timeout_sec": [5, 15]},
                {"id": 36940, "name": "zones"}
            ]
        }"#,
    )
    .expect("catalog parses");

    assert_eq!(catalog.service.requests_per_second, 4);
    assert_eq!(catalog.categories.len(), 3);

    let parcels = catalog.category("PARCELS").expect("by name");
    assert_eq!(parcels.split_threshold_km2, Some(25.0));
    assert_eq!(parcels.timeouts.as_slice().len(), 3);
    assert_eq!(parcels.max_retries, 5);
    assert_eq!(parcels.max_workers, 8);

    let buildings = catalog.category("36369").expect("by id");
    assert_eq!(buildings.split_threshold_km2, None);
    assert_eq!(buildings.timeouts.longest().as_secs(), 15);

    let zones = catalog.category("zones").expect("defaults");
    assert_eq!(zones.max_retries, 3);
    assert_eq!(zones.max_workers, 5);
    assert_eq!(zones.timeouts.longest().as_secs(), 30);

    assert!(catalog.category("forests").is_err());
}

#[tokio::test(start_paused = true)]
async fn report_labels_features_with_the_service_crs() {
    // Given: a region in degrees; the service always answers in Web Mercator
    let region = QueryRegion::new(
        MultiPolygon::new(vec![polygon![
            (x: 37.60, y: 55.74),
            (x: 37.62, y: 55.74),
            (x: 37.62, y: 55.76),
            (x: 37.60, y: 55.74),
        ]]),
        Crs::Wgs84,
    )
    .expect("region");
    let harvester = harvester_with_fetcher(
        FnFetcher::new(|_: &Tile| Some(FetchOutcome::Features(vec![feature("a")])))
            as std::sync::Arc<dyn TileFetcher>,
        service(),
    );

    let report = harvester
        .fetch_dataset(&region, &category())
        .await
        .expect("job succeeds");
    let document = serde_json::to_value(&report).expect("serialize");

    assert_eq!(report.crs, RESPONSE_CRS);
    assert_eq!(document["crs"], "EPSG:3857");
    assert_eq!(document["region_crs"], "EPSG:4326");
}

#[test]
fn region_crs_is_reported_by_code() {
    assert_eq!(Crs::Wgs84.code(), "EPSG:4326");
    assert_eq!("web-mercator".parse::<Crs>().expect("alias"), Crs::WebMercator);
}
