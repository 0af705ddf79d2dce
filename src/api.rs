//! HTTP gateway for the local front end.
//!
//! Routes:
//! - GET /api/index-ltp   - latest LTP per index, `null` until the first tick
//! - GET /api/instruments - raw instrument CSV, 503 until the first successful download
//! - GET /healthz         - liveness plus ticker / catalog status
//!
//! Only one browser origin is allowed. Requests carrying any other `Origin`
//! are refused with an empty 403 before reaching a handler.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::error::RelayResult;
use crate::market_data::price_cache::IndexLtpSnapshot;
use crate::relay::RelayState;

pub const CATALOG_NOT_LOADED: &str = "Instruments not loaded yet. Try again in a moment.";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Create the API router.
pub fn create_router(state: Arc<RelayState>, allowed_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin.clone())
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/api/index-ltp", get(index_ltp_handler))
        .route("/api/instruments", get(instruments_handler))
        .route("/healthz", get(health_handler))
        .layer(middleware::from_fn_with_state(allowed_origin, origin_guard))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> RelayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Server running on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn origin_guard(State(allowed): State<HeaderValue>, request: Request, next: Next) -> Response {
    let foreign = matches!(request.headers().get(header::ORIGIN), Some(origin) if *origin != allowed);
    if foreign {
        debug!(origin = ?request.headers().get(header::ORIGIN), uri = %request.uri(), "rejecting cross-origin request");
        return ApiError::OriginNotAllowed.into_response();
    }
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/index-ltp
async fn index_ltp_handler(State(state): State<Arc<RelayState>>) -> Json<IndexLtpSnapshot> {
    Json(state.prices.snapshot())
}

/// GET /api/instruments
async fn instruments_handler(State(state): State<Arc<RelayState>>) -> Result<Response, ApiError> {
    let body = state.catalog.body().ok_or(ApiError::CatalogNotLoaded)?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ticker_connected: bool,
    catalog_loaded: bool,
    catalog_records: Option<usize>,
    /// Unix seconds of the last successful download.
    catalog_fetched_at: Option<u64>,
}

/// GET /healthz
async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    let catalog = state.catalog.get();
    Json(HealthResponse {
        status: "ok",
        ticker_connected: state.ticker_connected(),
        catalog_loaded: catalog.is_some(),
        catalog_records: catalog.as_ref().map(|blob| blob.records),
        catalog_fetched_at: catalog.as_ref().map(|blob| blob.fetched_at_unix()),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    CatalogNotLoaded,
    OriginNotAllowed,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::CatalogNotLoaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, TEXT_PLAIN)],
                CATALOG_NOT_LOADED,
            )
                .into_response(),
            ApiError::OriginNotAllowed => StatusCode::FORBIDDEN.into_response(),
        }
    }
}
