use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::order::{Order, OrderStatus};
use crate::realtime::protocol::{OutboundFrame, StatusUpdate};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct StatusOptions {
    pub delivery_id: Uuid,
    pub current: DeliveryStatus,
    pub options: Vec<DeliveryStatus>,
}

async fn load_owned(
    state: &AppState,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<Delivery, AppError> {
    let delivery = state
        .deliveries
        .find_delivery(delivery_id)
        .await?
        .ok_or(AppError::DeliveryNotFound(delivery_id))?;

    if !delivery.is_assigned_to(courier_id) {
        return Err(AppError::Unauthorized(format!(
            "delivery {delivery_id} is not assigned to courier {courier_id}"
        )));
    }

    Ok(delivery)
}

/// Validates and applies a courier-driven status change.
///
/// The new status is committed before any notification goes out. Nothing after
/// the commit, including the order update, undoes it or turns it into an error.
pub async fn transition(
    state: &AppState,
    delivery_id: Uuid,
    next: DeliveryStatus,
    courier_id: Uuid,
    proof_image_url: Option<String>,
) -> Result<Delivery, AppError> {
    let delivery = load_owned(state, delivery_id, courier_id).await?;

    if !delivery.status.can_transition_to(next) {
        return Err(AppError::InvalidStatusTransition {
            from: delivery.status,
            to: next,
        });
    }

    if proof_image_url.is_some() && next != DeliveryStatus::Delivered {
        return Err(AppError::BadRequest(format!(
            "proof_image_url is only accepted with status {}",
            DeliveryStatus::Delivered
        )));
    }

    // The store re-checks the status we read, so a racing change loses here.
    let updated = state
        .deliveries
        .update_status(delivery_id, delivery.status, next, Utc::now(), proof_image_url)
        .await?;

    state
        .metrics
        .delivery_transitions_total
        .with_label_values(&[next.as_str()])
        .inc();

    info!(
        delivery_id = %delivery_id,
        courier_id = %courier_id,
        from = %delivery.status,
        to = %next,
        "delivery status changed"
    );

    let order = match next.order_status() {
        Some(order_status) => match state
            .orders
            .update_order_status(updated.order_id, order_status)
            .await
        {
            Ok(order) => Some(order),
            Err(err) => {
                warn!(
                    order_id = %updated.order_id,
                    delivery_id = %delivery_id,
                    error = %err,
                    "order status not updated after delivery change"
                );
                None
            }
        },
        None => None,
    };

    state.notifier.delivery_changed(&updated);
    state.connections.send(
        courier_id,
        &OutboundFrame::StatusUpdate(StatusUpdate::from(&updated)),
    );

    if next == DeliveryStatus::PickedUp {
        let partner_id = match order {
            Some(order) => Some(order.partner_id),
            None => match state.orders.find_order(updated.order_id).await {
                Ok(order) => order.map(|order| order.partner_id),
                Err(err) => {
                    warn!(order_id = %updated.order_id, error = %err, "could not resolve partner for pickup event");
                    None
                }
            },
        };

        if let Some(partner_id) = partner_id {
            state.notifier.order_picked_up(partner_id, &updated);
        }
    }

    Ok(updated)
}

/// Applies a partner's own move on an order that no courier has picked up yet.
pub async fn advance_order(
    state: &AppState,
    partner_id: Uuid,
    order_id: Uuid,
    next: OrderStatus,
) -> Result<Order, AppError> {
    let order = state
        .orders
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.partner_id != partner_id {
        return Err(AppError::Unauthorized(format!(
            "order {order_id} belongs to another partner"
        )));
    }

    if !order.status.partner_can_move_to(next) {
        return Err(AppError::BadRequest(format!(
            "order cannot move from {:?} to {:?}",
            order.status, next
        )));
    }

    if next == OrderStatus::Canceled
        && state
            .deliveries
            .find_active_for_order(order_id)
            .await?
            .is_some()
    {
        return Err(AppError::Conflict(format!(
            "order {order_id} already has a courier assigned"
        )));
    }

    let updated = state.orders.update_order_status(order_id, next).await?;
    info!(partner_id = %partner_id, order_id = %order_id, status = ?next, "order status changed by partner");

    state
        .notifier
        .order_status_changed(partner_id, order_id, next);

    Ok(updated)
}

pub async fn status_options(
    state: &AppState,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<StatusOptions, AppError> {
    let delivery = load_owned(state, delivery_id, courier_id).await?;

    Ok(StatusOptions {
        delivery_id,
        current: delivery.status,
        options: delivery.status.successors().to_vec(),
    })
}
