use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::api::rest::auth::CourierUser;
use crate::error::AppError;
use crate::models::courier::CourierAvailability;
use crate::models::delivery::Delivery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courier/availability", post(set_availability))
        .route("/courier/deliveries", get(list_deliveries))
        .route("/courier/refresh-availability", post(refresh_availability))
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub is_available: bool,
    pub is_working: bool,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DeliveriesQuery {
    #[serde(default)]
    pub active_only: bool,
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<CourierAvailability>, AppError> {
    let courier_id = courier.courier_id();
    let now = Utc::now();

    let availability = match state.couriers.find_availability(courier_id).await? {
        Some(mut current) => {
            let changed = current.is_available != payload.is_available
                || current.is_working != payload.is_working;
            current.is_available = payload.is_available;
            current.is_working = payload.is_working;
            if let Some(city) = payload.city {
                current.city = city;
            }
            if changed {
                current.last_status_change = now;
            }
            current
        }
        None => CourierAvailability {
            courier_id,
            city: payload.city.unwrap_or_default(),
            is_available: payload.is_available,
            is_working: payload.is_working,
            last_status_change: now,
        },
    };

    let saved = state.couriers.save_availability(availability).await?;
    info!(
        courier_id = %courier_id,
        is_available = saved.is_available,
        is_working = saved.is_working,
        "courier availability updated"
    );

    Ok(Json(saved))
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    let deliveries = if query.active_only {
        state.deliveries.active_for_courier(courier.courier_id()).await?
    } else {
        state.deliveries.all_for_courier(courier.courier_id()).await?
    };
    Ok(Json(deliveries))
}

/// Recomputes availability from shift state and open deliveries.
async fn refresh_availability(
    State(state): State<Arc<AppState>>,
    courier: CourierUser,
) -> Result<Json<CourierAvailability>, AppError> {
    let courier_id = courier.courier_id();
    let mut availability = state
        .couriers
        .find_availability(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no availability record for courier {courier_id}")))?;

    let active = state.deliveries.active_for_courier(courier_id).await?;
    availability.is_available = availability.is_working && active.is_empty();
    availability.last_status_change = Utc::now();

    let saved = state.couriers.save_availability(availability).await?;
    info!(
        courier_id = %courier_id,
        is_available = saved.is_available,
        active_deliveries = active.len(),
        "courier availability refreshed"
    );

    Ok(Json(saved))
}
