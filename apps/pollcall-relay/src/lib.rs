pub mod config;
pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use pollcall::signaling::MemoryRelay;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    clear_call, get_answer, get_candidates, get_offer, health_check, post_answer, post_candidate,
    post_offer,
};

pub fn build_router(relay: MemoryRelay) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/calls/:party/offer", post(post_offer).get(get_offer))
        .route("/calls/:party/answer", post(post_answer).get(get_answer))
        .route("/calls/:party", axum::routing::delete(clear_call))
        .route("/candidates/:party", post(post_candidate).get(get_candidates))
        .with_state(relay)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
