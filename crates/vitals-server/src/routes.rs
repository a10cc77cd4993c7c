//! Route configuration for the HTTP API.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, latest_samples, quality_summary, query_timeseries};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config().cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/timeseries/query", get(query_timeseries))
        .route("/timeseries/latest", get(latest_samples))
        .route("/timeseries/quality", get(quality_summary))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vitals_archive::{ColdStore, MemoryColdStore};
    use vitals_store::{HotStore, ManualClock, NamedSample, PointRegistry, Sample, SqliteStore, TimeRange};

    use crate::config::ServerConfig;

    const DAY: i64 = 86_400_000;
    const HOUR: i64 = 3_600_000;
    const NOW: i64 = 1_700_000_000_000;
    const SITE: &str = "building-vitals-hq";

    fn make_state() -> Arc<AppState> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store.resolve(SITE, "AHU-1.SupplyTemp").unwrap();
        store
            .upsert_samples(&[
                Sample::new(id, NOW - 500, 21.5),
                Sample::new(id, NOW - 1_500, 21.0),
            ])
            .unwrap();

        let cold = Arc::new(MemoryColdStore::new());
        cold.write_segment(
            SITE,
            TimeRange::new(NOW - 30 * DAY, NOW - 25 * DAY).unwrap(),
            &[NamedSample::new("AHU-1.SupplyTemp", NOW - 26 * DAY, 19.0)],
        )
        .unwrap();

        Arc::new(
            AppState::from_parts(
                ServerConfig::default(),
                store,
                cold,
                None,
                Arc::new(ManualClock::new(NOW)),
            )
            .unwrap(),
        )
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let app = create_router(make_state());
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, json) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20.000Z");
    }

    #[tokio::test]
    async fn query_endpoint_returns_ordered_samples() {
        let uri = format!(
            "/timeseries/query?site_name={SITE}&point_names=AHU-1.SupplyTemp&start_time={}&end_time={NOW}",
            NOW - 2_000
        );
        let (status, json) = get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["site_name"], SITE);
        assert_eq!(json["samples"][0]["timestamp"], NOW - 1_500);
        assert_eq!(json["samples"][1]["value"], 21.5);
        assert_eq!(json["metadata"]["total_samples"], 2);
        assert_eq!(json["metadata"]["sources"], serde_json::json!(["hot"]));
        assert_eq!(json["metadata"]["storage_tiers"]["hot"]["sample_count"], 2);
    }

    #[tokio::test]
    async fn query_endpoint_spans_tiers() {
        let uri = format!(
            "/timeseries/query?site_name={SITE}&point_names=AHU-1.SupplyTemp&start_time={}&end_time={NOW}",
            NOW - 30 * DAY
        );
        let (status, json) = get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metadata"]["total_samples"], 3);
        assert_eq!(json["metadata"]["sources"], serde_json::json!(["hot", "cold"]));
        assert_eq!(json["metadata"]["storage_tiers"]["cold"]["file_count"], 1);
        assert_eq!(json["samples"][0]["value"], 19.0);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let cases = [
            "/timeseries/query?point_names=A&start_time=0&end_time=1",
            "/timeseries/query?site_name=other&point_names=A&start_time=0&end_time=1",
            "/timeseries/query?site_name=building-vitals-hq&start_time=0&end_time=1",
            "/timeseries/query?site_name=building-vitals-hq&point_names=A&start_time=abc&end_time=1",
            "/timeseries/latest?site_name=building-vitals-hq",
        ];
        for uri in cases {
            let (status, json) = get_json(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json["error_code"], "INVALID_REQUEST");
            assert!(json["error"].is_string());
        }
    }

    #[tokio::test]
    async fn malformed_query_string_is_a_json_error() {
        let cases = [
            "/timeseries/query?site_name=building-vitals-hq&point_names=A&start_time=0&start_time=5&end_time=10",
            "/timeseries/latest?site_name=a&site_name=b&point_names=A",
            "/timeseries/quality?site_name=building-vitals-hq&point_names=A&point_names=B&start_time=0&end_time=1",
        ];
        for uri in cases {
            let app = create_router(make_state());
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                response.headers()["content-type"],
                "application/json",
                "{uri}"
            );
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error_code"], "INVALID_REQUEST", "{uri}");
            assert!(json["error"].as_str().unwrap().contains("duplicate field"), "{json}");
        }
    }

    #[tokio::test]
    async fn future_start_boundary() {
        for (offset, expected) in [(1, StatusCode::BAD_REQUEST), (0, StatusCode::OK)] {
            let start = NOW + offset;
            let uri = format!(
                "/timeseries/query?site_name={SITE}&point_names=A&start_time={start}&end_time={}",
                NOW + 23 * HOUR
            );
            let (status, _) = get_json(&uri).await;
            assert_eq!(status, expected, "offset {offset}");
        }
    }

    #[tokio::test]
    async fn latest_endpoint() {
        let uri = format!("/timeseries/latest?site_name={SITE}&point_names=AHU-1.SupplyTemp,unknown");
        let (status, json) = get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["samples"].as_array().unwrap().len(), 1);
        assert_eq!(json["samples"][0]["timestamp"], NOW - 500);
    }

    #[tokio::test]
    async fn quality_endpoint() {
        let uri = format!(
            "/timeseries/quality?site_name={SITE}&point_names=AHU-1.SupplyTemp&start_time={}&end_time={NOW}",
            NOW - DAY
        );
        let (status, json) = get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["points"][0]["sample_count"], 2);
        assert_eq!(json["points"][0]["max"], 21.5);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = create_router(make_state());
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
