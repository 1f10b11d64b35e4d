// FuelEU Compliance - REST API server
//
// JSON boundary over the compliance core. Transport concerns only; all
// validation and ledger/pool semantics live in the library.

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use fueleu_compliance::{
    adjusted_cb_for_year, banking, compare_to_baseline, compute_and_snapshot, create_pool,
    set_baseline, CoreError, PoolMemberInput, RouteFilter, RouteStore, SqliteStore, VERSION,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

/// Map core errors to HTTP statuses; validation errors stay 4xx, storage 5xx.
fn error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::InvalidArgument(_)
        | CoreError::InsufficientBalance { .. }
        | CoreError::InfeasiblePool { .. } => StatusCode::BAD_REQUEST,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("storage failure: {err}");
    }

    (status, Json(ApiResponse::err(err.to_string()))).into_response()
}

// ============================================================================
// Request / query shapes (camelCase, matching the JSON API)
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteListQuery {
    vessel_type: Option<String>,
    fuel_type: Option<String>,
    year: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShipYearQuery {
    ship_id: String,
    year: i32,
}

#[derive(Deserialize)]
struct YearQuery {
    year: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankRequest {
    ship_id: String,
    year: i32,
    /// Amount in integer gCO2e; must be positive.
    amount: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolRequest {
    year: i32,
    members: Vec<PoolMemberRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolMemberRequest {
    ship_id: String,
    cb_before: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "service": "fueleu-compliance",
        "version": VERSION,
    })))
}

/// GET /api/routes - Route catalogue with optional filters
async fn get_routes(
    State(state): State<AppState>,
    Query(query): Query<RouteListQuery>,
) -> Response {
    let filter = RouteFilter {
        vessel_type: query.vessel_type,
        fuel_type: query.fuel_type,
        year: query.year,
    };

    match state.store.all_routes(&filter) {
        Ok(routes) => Json(ApiResponse::ok(routes)).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /api/routes/:routeId/baseline - Flag a route as baseline
async fn post_baseline(
    State(state): State<AppState>,
    UrlPath(route_id): UrlPath<String>,
) -> Response {
    match set_baseline(state.store.as_ref(), &route_id) {
        Ok(route) => Json(ApiResponse::ok(route)).into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /api/routes/comparison - Compare all routes to the baseline
async fn get_comparison(State(state): State<AppState>) -> Response {
    match compare_to_baseline(state.store.as_ref()) {
        Ok(report) => Json(ApiResponse::ok(report)).into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /api/compliance/cb?shipId=&year= - Compute and snapshot a CB
async fn get_compliance_cb(
    State(state): State<AppState>,
    Query(query): Query<ShipYearQuery>,
) -> Response {
    let store = state.store.as_ref();
    match compute_and_snapshot(store, store, &query.ship_id, query.year) {
        Ok(snapshot) => Json(ApiResponse::ok(snapshot)).into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /api/compliance/adjusted?year= - Adjusted CB per ship
async fn get_adjusted_cb(
    State(state): State<AppState>,
    Query(query): Query<YearQuery>,
) -> Response {
    match adjusted_cb_for_year(state.store.as_ref(), query.year) {
        Ok(report) => Json(ApiResponse::ok(report)).into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /api/banking/records?shipId=&year= - Ledger entries plus balance
async fn get_bank_records(
    State(state): State<AppState>,
    Query(query): Query<ShipYearQuery>,
) -> Response {
    let store = state.store.as_ref();

    let entries = match banking::list_entries(store, &query.ship_id, query.year) {
        Ok(entries) => entries,
        Err(err) => return error_response(err),
    };
    let balance = match banking::available_balance(store, &query.ship_id, query.year) {
        Ok(balance) => balance,
        Err(err) => return error_response(err),
    };

    Json(ApiResponse::ok(serde_json::json!({
        "shipId": query.ship_id,
        "year": query.year,
        "entries": entries,
        "totalBanked": balance,
    })))
    .into_response()
}

/// POST /api/banking/bank - Deposit surplus
async fn post_bank(State(state): State<AppState>, Json(req): Json<BankRequest>) -> Response {
    match banking::deposit(state.store.as_ref(), &req.ship_id, req.year, req.amount) {
        Ok(entry) => Json(ApiResponse::ok(entry)).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /api/banking/apply - Apply banked surplus
async fn post_apply(State(state): State<AppState>, Json(req): Json<BankRequest>) -> Response {
    match banking::withdraw(state.store.as_ref(), &req.ship_id, req.year, req.amount) {
        Ok(entry) => Json(ApiResponse::ok(entry)).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /api/pools - Allocate and persist a pool
async fn post_pool(State(state): State<AppState>, Json(req): Json<PoolRequest>) -> Response {
    let members: Vec<PoolMemberInput> = req
        .members
        .into_iter()
        .map(|m| PoolMemberInput {
            ship_id: m.ship_id,
            cb_before: m.cb_before,
        })
        .collect();

    match create_pool(state.store.as_ref(), req.year, &members) {
        Ok(result) => Json(ApiResponse::ok(result)).into_response(),
        Err(err) => error_response(err),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let db_path = std::env::var("FUELEU_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("fueleu.db"));

    let store = match SqliteStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open database at {:?}: {e}", db_path);
            std::process::exit(1);
        }
    };
    info!("database opened: {:?}", db_path);

    let state = AppState { store };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/routes", get(get_routes))
        .route("/routes/comparison", get(get_comparison))
        .route("/routes/:route_id/baseline", post(post_baseline))
        .route("/compliance/cb", get(get_compliance_cb))
        .route("/compliance/adjusted", get(get_adjusted_cb))
        .route("/banking/records", get(get_bank_records))
        .route("/banking/bank", post(post_bank))
        .route("/banking/apply", post(post_apply))
        .route("/pools", post(post_pool))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("FUELEU_ADDR").unwrap_or_else(|_| "0.0.0.0:4000".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("server listening on http://{addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
