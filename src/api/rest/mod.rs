pub mod auth;
pub mod courier;
pub mod deliveries;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ws;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(deliveries::router())
        .merge(courier::router())
        .merge(ws::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any)
}

#[derive(Serialize)]
struct TopicCounts {
    tracking: usize,
    orders: usize,
    partners: usize,
    chats: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connected_couriers: usize,
    pending_location_requests: usize,
    topics: TopicCounts,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connected_couriers: state.connections.len(),
        pending_location_requests: state.pending_locations.pending_count(),
        topics: TopicCounts {
            tracking: state.topics.tracking.subject_count(),
            orders: state.topics.orders.subject_count(),
            partners: state.topics.partners.subject_count(),
            chats: state.topics.chats.subject_count(),
        },
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
