use shuttle_axum::axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aggregator::{AggregationResult, Aggregator};
use crate::error::ErrorBody;

pub const CACHE_HEADER: &str = "x-cache";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/markets", get(markets))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct MarketsQuery {
    /// Kept as text so junk values fall back to the default instead of 400.
    #[serde(default)]
    limit: Option<String>,
}

impl MarketsQuery {
    fn requested(&self) -> Option<usize> {
        self.limit
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(|v| v.max(0) as usize)
    }
}

#[derive(serde::Serialize)]
struct MarketsResponse<'a> {
    #[serde(flatten)]
    result: &'a AggregationResult,
    timestamp: u64,
}

async fn markets(State(state): State<AppState>, Query(q): Query<MarketsQuery>) -> Response {
    match state.aggregator.get(q.requested()).await {
        Ok((result, cache)) => {
            let body = MarketsResponse {
                result: &result,
                timestamp: state.aggregator.now_ms(),
            };
            let mut resp = Json(body).into_response();
            resp.headers_mut()
                .insert(CACHE_HEADER, HeaderValue::from_static(cache.as_str()));
            resp
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "markets request failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody::from(&e))).into_response()
        }
    }
}
