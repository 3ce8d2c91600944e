use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::CourierUser;
use crate::engine::lifecycle::{self, StatusOptions};
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/:id/accept", post(accept_delivery))
        .route("/deliveries/:id/status", patch(update_delivery_status))
        .route("/deliveries/:id/status-options", get(delivery_status_options))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    #[serde(default)]
    pub proof_image_url: Option<String>,
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = lifecycle::transition(
        &state,
        id,
        DeliveryStatus::Accepted,
        courier.courier_id(),
        None,
    )
    .await?;
    Ok(Json(delivery))
}

async fn update_delivery_status(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    if let Some(url) = payload.proof_image_url.as_deref() {
        if url.trim().is_empty() {
            return Err(AppError::BadRequest(
                "proof_image_url cannot be empty".to_string(),
            ));
        }
    }

    let delivery = lifecycle::transition(
        &state,
        id,
        payload.status,
        courier.courier_id(),
        payload.proof_image_url,
    )
    .await?;
    Ok(Json(delivery))
}

async fn delivery_status_options(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusOptions>, AppError> {
    let options = lifecycle::status_options(&state, id, courier.courier_id()).await?;
    Ok(Json(options))
}
