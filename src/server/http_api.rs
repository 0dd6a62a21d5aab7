//! HTTP API over a JSON-valued cache.
//!
//! Routes:
//! - GET/PUT /v1/cache/{key}, DELETE /v1/cache
//! - POST /v1/cache/batch/get, POST /v1/cache/batch/set
//! - POST /v1/invalidate, POST /v1/rules
//! - POST /v1/optimize, POST /v1/prefetch
//! - GET/POST /v1/snapshot
//! - GET /v1/stats, GET /metrics, GET /health

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::entry::Tier;
use crate::cache::invalidation::{InvalidationRule, InvalidationStrategy, RuleSpec};
use crate::cache::snapshot::CacheSnapshot;
use crate::cache::stats::Stats;
use crate::cache::store::{BatchEntry, InvalidateOptions, OptimizeReport, Priority, SetOptions, TieredCache};

/// The cache type served over HTTP.
pub type JsonCache = TieredCache<Value>;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: Arc<JsonCache>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(cache: Arc<JsonCache>) -> Self {
        Self {
            cache,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/cache/{key}", get(get_value).put(put_value))
        .route("/v1/cache", axum::routing::delete(clear_cache))
        .route("/v1/cache/batch/get", post(batch_get))
        .route("/v1/cache/batch/set", post(batch_set))
        .route("/v1/invalidate", post(invalidate))
        .route("/v1/rules", post(add_rule))
        .route("/v1/optimize", post(optimize))
        .route("/v1/prefetch", post(prefetch))
        .route("/v1/snapshot", get(export_snapshot).post(import_snapshot))
        .route("/v1/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Body of a single write.
#[derive(Debug, Deserialize)]
pub struct PutRequest {
    pub value: Value,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub priority: Priority,
}

impl PutRequest {
    fn options(&mut self) -> SetOptions {
        SetOptions {
            ttl_ms: self.ttl_ms,
            dependencies: std::mem::take(&mut self.dependencies),
            force_tier: self.tier,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValueResponse {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct KeysRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchSetItem {
    pub key: String,
    #[serde(flatten)]
    pub body: PutRequest,
}

#[derive(Debug, Deserialize)]
pub struct BatchSetRequest {
    pub entries: Vec<BatchSetItem>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
    #[serde(default)]
    pub strategy: InvalidationStrategy,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub entries: usize,
    pub hit_ratio: f64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn get_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ValueResponse>, StatusCode> {
    match state.cache.get(&key).await {
        Some(value) => Ok(Json(ValueResponse { key, value })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn put_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(mut req): Json<PutRequest>,
) -> StatusCode {
    let options = req.options();
    state.cache.set(&key, req.value, options).await;
    StatusCode::NO_CONTENT
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id = request_id, "Clear request");
    state.cache.clear().await;
    StatusCode::NO_CONTENT
}

async fn batch_get(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> Json<HashMap<String, Option<Value>>> {
    Json(state.cache.get_batch(&req.keys).await)
}

async fn batch_set(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchSetRequest>,
) -> Json<CountResponse> {
    let count = req.entries.len();
    let entries = req
        .entries
        .into_iter()
        .map(|mut item| {
            let options = item.body.options();
            BatchEntry::new(item.key, item.body.value).with_options(options)
        })
        .collect();
    state.cache.set_batch(entries).await;
    Json(CountResponse { count })
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateRequest>,
) -> Json<CountResponse> {
    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id = request_id,
        pattern = req.pattern,
        strategy = ?req.strategy,
        "Invalidate request"
    );

    let options = InvalidateOptions {
        strategy: req.strategy,
        batch_size: req.batch_size,
    };
    let count = state.cache.invalidate(req.pattern, options).await;
    Json(CountResponse { count })
}

async fn add_rule(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<RuleSpec>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match InvalidationRule::try_from(spec) {
        Ok(rule) => {
            state.cache.add_invalidation_rule(rule);
            Ok(StatusCode::CREATED)
        }
        Err(e) => {
            warn!(error = %e, "Rejected invalidation rule");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

async fn optimize(State(state): State<Arc<AppState>>) -> Json<OptimizeReport> {
    Json(state.cache.optimize().await)
}

async fn prefetch(State(state): State<Arc<AppState>>, Json(req): Json<KeysRequest>) -> StatusCode {
    state.cache.prefetch(req.keys);
    StatusCode::ACCEPTED
}

async fn export_snapshot(State(state): State<Arc<AppState>>) -> Json<CacheSnapshot<Value>> {
    Json(state.cache.export().await)
}

async fn import_snapshot(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<CacheSnapshot<Value>>,
) -> Json<CountResponse> {
    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id = request_id,
        snapshot_id = %snapshot.id,
        entries = snapshot.len(),
        "Import request"
    );
    let count = state.cache.import(snapshot).await;
    Json(CountResponse { count })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
    Json(state.cache.get_stats())
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render_metrics(&state.cache.get_stats()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("Failed to encode metrics: {e}"),
        ),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.cache.get_stats();
    let entries = stats
        .tiers
        .iter()
        .filter(|t| t.tier != Tier::L3)
        .map(|t| t.size)
        .sum();

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        entries,
        hit_ratio: stats.overall.hit_ratio,
    })
}

/// Render a stats snapshot in the Prometheus text format.
pub fn render_metrics(stats: &Stats) -> Result<String, prometheus::Error> {
    let registry = Registry::new();

    let hits = IntCounterVec::new(Opts::new("tier_cache_hits_total", "Cache hits by tier"), &["tier"])?;
    let misses = IntCounterVec::new(Opts::new("tier_cache_misses_total", "Cache misses by tier"), &["tier"])?;
    let entries = IntGaugeVec::new(Opts::new("tier_cache_entries", "Entries held by tier"), &["tier"])?;
    let memory = IntGaugeVec::new(
        Opts::new("tier_cache_memory_bytes", "Logical bytes held by tier"),
        &["tier"],
    )?;
    registry.register(Box::new(hits.clone()))?;
    registry.register(Box::new(misses.clone()))?;
    registry.register(Box::new(entries.clone()))?;
    registry.register(Box::new(memory.clone()))?;

    for tier in &stats.tiers {
        let label = tier.tier.to_string();
        hits.with_label_values(&[label.as_str()]).inc_by(tier.hits);
        misses.with_label_values(&[label.as_str()]).inc_by(tier.misses);
        entries.with_label_values(&[label.as_str()]).set(tier.size as i64);
        memory
            .with_label_values(&[label.as_str()])
            .set(tier.memory_bytes as i64);
    }

    let hit_ratio = Gauge::new("tier_cache_hit_ratio", "Hits over total requests")?;
    hit_ratio.set(stats.overall.hit_ratio);
    registry.register(Box::new(hit_ratio))?;

    let compression = Gauge::new("tier_cache_compression_ratio", "Uncompressed over compressed bytes")?;
    compression.set(stats.overall.compression_ratio);
    registry.register(Box::new(compression))?;

    for (name, help, value) in [
        ("tier_cache_evictions_total", "Entries evicted for capacity", stats.overall.evictions),
        ("tier_cache_invalidations_total", "Keys invalidated", stats.overall.invalidations),
        ("tier_cache_promotions_total", "Entries copied to a faster tier", stats.overall.promotions),
        ("tier_cache_demotions_total", "Entries moved to a slower tier", stats.overall.demotions),
    ] {
        let counter = IntCounter::new(name, help)?;
        counter.inc_by(value);
        registry.register(Box::new(counter))?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::CacheConfig;

    fn router() -> (Router, Arc<JsonCache>) {
        let cache = Arc::new(JsonCache::new(CacheConfig::default()).unwrap());
        (build_router(Arc::new(AppState::new(cache.clone()))), cache)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (app, _) = router();

        let put = app
            .clone()
            .oneshot(json_request("PUT", "/v1/cache/user:1", serde_json::json!({"value": {"name": "ada"}})))
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::NO_CONTENT);

        let get = app
            .oneshot(Request::get("/v1/cache/user:1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(body_json(get).await["value"]["name"], "ada");
    }

    #[tokio::test]
    async fn test_missing_key_is_404() {
        let (app, _) = router();
        let response = app
            .oneshot(Request::get("/v1/cache/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rule_and_invalidate() {
        let (app, cache) = router();
        cache.set("balance:1", serde_json::json!(10), SetOptions::default()).await;
        cache.set("account:1", serde_json::json!("a"), SetOptions::default()).await;

        let rule = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/rules",
                serde_json::json!({"pattern": "^balance:.*", "dependencies": ["account:.*"]}),
            ))
            .await
            .unwrap();
        assert_eq!(rule.status(), StatusCode::CREATED);

        let response = app
            .oneshot(json_request("POST", "/v1/invalidate", serde_json::json!({"pattern": "balance:1"})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["count"], 2);
        assert_eq!(cache.get("account:1").await, None);
    }

    #[tokio::test]
    async fn test_bad_rule_rejected() {
        let (app, _) = router();
        let response = app
            .oneshot(json_request("POST", "/v1/rules", serde_json::json!({"pattern": "(unclosed"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_text() {
        let (app, cache) = router();
        cache.set("k", serde_json::json!(1), SetOptions::default()).await;
        cache.get("k").await;

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("tier_cache_hits_total{tier=\"L1\"} 1"));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let (app, cache) = router();
        cache.set("a", serde_json::json!([1, 2]), SetOptions::default()).await;

        let export = app
            .clone()
            .oneshot(Request::get("/v1/snapshot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let snapshot = body_json(export).await;
        cache.clear().await;

        let import = app
            .oneshot(json_request("POST", "/v1/snapshot", snapshot))
            .await
            .unwrap();
        assert_eq!(body_json(import).await["count"], 1);
        assert_eq!(cache.get("a").await, Some(serde_json::json!([1, 2])));
    }
}
