// src/api.rs
//! Dashboard HTTP surface. Handlers only read cache files; the batch
//! binaries are the only writers apart from the subscriber list.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::warn;

use crate::config::AppConfig;
use crate::indicators::{AaiiSnapshot, FearGreedSnapshot};
use crate::llm::commentary::OverallAnalysis;
use crate::metrics::Metrics;
use crate::provider;
use crate::ssi::MonthlyIndicatorRecord;
use crate::subscribers::{SubscriberError, SubscriberStore};

pub const MARKET_DATA_ERROR: &str = "Failed to load market data from cache.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Serializes read-modify-write cycles on the subscriber file.
    pub subscribers: Arc<Mutex<SubscriberStore>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let store = SubscriberStore::new(config.paths.subscribers_file());
        Self {
            config: Arc::new(config),
            subscribers: Arc::new(Mutex::new(store)),
        }
    }
}

/// Full application router: API routes, `/metrics`, static dashboard fallback.
pub fn router(state: AppState, metrics: &Metrics) -> Router {
    let static_dir = state.config.paths.static_dir.clone();
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/market-data", get(market_data))
        .route("/api/ssi", get(ssi_data))
        .route("/api/subscribe", post(subscribe))
        .route("/api/unsubscribe", post(unsubscribe))
        .route("/unsubscribe", get(unsubscribe_link))
        .with_state(state)
        .merge(metrics.router())
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::very_permissive())
}

#[derive(Serialize)]
struct MarketData {
    fear_and_greed: FearGreedSnapshot,
    aaii_sentiment: AaiiSnapshot,
    overall_analysis: OverallAnalysis,
    /// Empty when the SSI cache has not been built yet.
    ssi: Vec<MonthlyIndicatorRecord>,
}

async fn market_data(State(state): State<AppState>) -> Response {
    let cfg = &state.config;
    let (fng, aaii) = match (provider::fear_greed(cfg), provider::aaii_sentiment(cfg)) {
        (Ok(f), Ok(a)) => (f, a),
        (f, a) => {
            for err in [f.err(), a.err()].into_iter().flatten() {
                warn!(target: "api", error = %err, "market data unavailable");
            }
            counter!("api_market_data_errors_total").increment(1);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": MARKET_DATA_ERROR })),
            )
                .into_response();
        }
    };
    Json(MarketData {
        fear_and_greed: fng,
        aaii_sentiment: aaii,
        overall_analysis: provider::overall_analysis(cfg),
        ssi: provider::ssi_records(cfg).unwrap_or_default(),
    })
    .into_response()
}

async fn ssi_data(State(state): State<AppState>) -> Response {
    match provider::ssi_records(&state.config) {
        Ok(records) => Json(json!({ "count": records.len(), "data": records })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
struct EmailBody {
    email: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Serialize)]
struct ActionResp {
    success: bool,
    message: String,
}

fn action_response(action: &'static str, res: Result<&'static str, SubscriberError>) -> Response {
    let (status, success, message) = match res {
        Ok(msg) => (StatusCode::OK, true, msg.to_string()),
        Err(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, false, e.to_string()),
        Err(e) => {
            warn!(target: "api", action, error = ?e, "subscriber store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, false, e.to_string())
        }
    };
    let result = if success { "ok" } else { "rejected" };
    counter!("api_subscriptions_total", "action" => action, "result" => result).increment(1);
    (status, Json(ActionResp { success, message })).into_response()
}

async fn subscribe(State(state): State<AppState>, Json(body): Json<EmailBody>) -> Response {
    let res = {
        let store = state.subscribers.lock().await;
        store.add(body.email.as_deref(), body.source.as_deref())
    };
    action_response("subscribe", res)
}

async fn unsubscribe(State(state): State<AppState>, Json(body): Json<EmailBody>) -> Response {
    let res = {
        let store = state.subscribers.lock().await;
        store.remove(body.email.as_deref())
    };
    action_response("unsubscribe", res)
}

#[derive(Deserialize)]
struct UnsubscribeQuery {
    email: Option<String>,
}

/// Target of the link in every alert email.
async fn unsubscribe_link(State(state): State<AppState>, Query(q): Query<UnsubscribeQuery>) -> Response {
    let res = {
        let store = state.subscribers.lock().await;
        store.remove(q.email.as_deref())
    };
    let status = match &res {
        Ok(_) => StatusCode::OK,
        Err(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match &res {
        Ok(msg) => msg.to_string(),
        Err(e) => e.to_string(),
    };
    counter!(
        "api_subscriptions_total",
        "action" => "unsubscribe_link",
        "result" => if res.is_ok() { "ok" } else { "rejected" }
    )
    .increment(1);
    let page = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Market Sentiment Terminal</title></head>\
<body style=\"font-family: 'Courier New', monospace; background:#0a0a0a; color:#e4e4e4; padding:40px;\">\
<h1 style=\"color:#ff8c00;\">MARKET SENTIMENT TERMINAL</h1><p>{}</p><p><a style=\"color:#ff8c00;\" href=\"{}\">Back to dashboard</a></p>\
</body></html>",
        html_escape::encode_text(&message),
        html_escape::encode_double_quoted_attribute(&state.config.dashboard.url),
    );
    (status, Html(page)).into_response()
}
