use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/gate/tokens", post(handlers::issue_gate_token))
        .route("/gate/scan", post(handlers::handle_gate_scan))
        .route("/fare", get(handlers::quote_fare))
        .route(
            "/journeys",
            get(handlers::list_journeys).post(handlers::journey_command),
        )
        .route("/journeys/active", get(handlers::active_journey))
        .route("/journeys/stats", get(handlers::journey_stats))
        .route(
            "/cards",
            get(handlers::list_cards).post(handlers::create_card),
        )
        .route("/cards/:id", get(handlers::get_card))
        .route("/payments/confirm", post(handlers::confirm_payment))
        .route("/stations", get(handlers::list_stations))
        .route("/stations/:id", get(handlers::get_station))
        .layer(TraceLayer::new_for_http())
}
