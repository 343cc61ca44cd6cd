// HTTP routes: query surface over the Monitor façade

mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::monitor::Monitor;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) monitor: Arc<Monitor>,
}

pub fn app(monitor: Arc<Monitor>) -> Router {
    let state = AppState { monitor };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/status", post(http::status_handler)) // POST /api/status?prefix=
        .route("/api/fixed-rate", get(http::fixed_rate_handler)) // GET /api/fixed-rate?hours=
        .route("/api/fixed-rate/{name}", get(http::window_handler)) // GET /api/fixed-rate/{name}?minutes=
        .route("/api/rollups/{tier}", get(http::rollups_handler)) // GET /api/rollups/{tier}?hours=
        .route("/api/report/hourly", get(http::hourly_report_handler)) // GET /api/report/hourly?date=
        .route(
            "/api/whitelist",
            get(http::whitelist_handler).post(http::add_whitelist_handler),
        ) // GET | POST /api/whitelist
        .route("/api/cleanup", post(http::cleanup_handler)) // POST /api/cleanup
        .route("/api/stats", get(http::stats_handler)) // GET /api/stats
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
