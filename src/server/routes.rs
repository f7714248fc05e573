//! Router configuration for the analysis API.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::limits;
use super::AppState;

/// Outer body cap. Generous on purpose: the per-file limit is enforced
/// in the handlers so oversized uploads get an envelope, not a bare 413.
const BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    // Endpoints with their own per-IP budget on top of the global one.
    let company = Router::new()
        .route("/api/analysis/company", post(handlers::analyse_company))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limits::company,
        ));
    let uploads = Router::new()
        .route("/api/uploads", post(handlers::upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), limits::upload));
    let contract = Router::new()
        .route("/api/analysis/contract", post(handlers::analyse_contract))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limits::contract,
        ));

    let api = Router::new()
        .route("/api/analysis/quote", post(handlers::analyse_quote))
        .route(
            "/api/analysis/acceptance",
            post(handlers::analyse_acceptance),
        )
        .route("/api/analysis/designer", post(handlers::analyse_designer))
        .route("/api/tasks/:task_id", get(handlers::task_status))
        .route("/api/tasks/:task_id/events", get(handlers::task_events))
        .route("/api/reports/:fingerprint", get(handlers::get_report))
        .route("/api/admin/invalidate", post(handlers::admin_invalidate))
        .route("/api/admin/stats", get(handlers::admin_stats))
        .merge(company)
        .merge(uploads)
        .merge(contract)
        .layer(middleware::from_fn_with_state(state.clone(), limits::global));

    // Health and signed blob fetches sit outside the per-IP budgets.
    Router::new()
        .merge(api)
        .route("/healthz", get(handlers::healthz))
        .route("/blobs/:key", get(handlers::fetch_blob))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
