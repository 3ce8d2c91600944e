use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{estimate_travel_minutes, haversine_km};
use crate::models::courier::{CourierAvailability, GeoPoint};
use crate::models::delivery::{Delivery, NewDelivery};
use crate::models::order::Order;
use crate::realtime::pending::PendingLocations;
use crate::realtime::protocol::{DeliveryAssigned, LocationRequest, OutboundFrame};
use crate::state::AppState;
use crate::tokens::TrackingClaims;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub courier_id: Uuid,
    pub location: GeoPoint,
    /// False when the position came from the stored samples instead of a live poll.
    pub live: bool,
}

/// Closest candidate to `pickup`. Exact ties go to the earlier candidate.
pub fn nearest<'a>(pickup: &GeoPoint, candidates: &'a [Candidate]) -> Option<(&'a Candidate, f64)> {
    candidates
        .iter()
        .map(|candidate| (candidate, haversine_km(pickup, &candidate.location)))
        .fold(None, |best, (candidate, distance)| match best {
            Some((_, best_distance)) if best_distance <= distance => best,
            _ => Some((candidate, distance)),
        })
}

struct DispatchGuard<'a> {
    dispatching: &'a DashMap<Uuid, ()>,
    order_id: Uuid,
}

impl<'a> DispatchGuard<'a> {
    fn acquire(dispatching: &'a DashMap<Uuid, ()>, order_id: Uuid) -> Option<Self> {
        match dispatching.insert(order_id, ()) {
            Some(()) => None,
            None => Some(Self {
                dispatching,
                order_id,
            }),
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.dispatching.remove(&self.order_id);
    }
}

/// Drops the pending entry if the poll is abandoned before a reply.
struct PendingRequest<'a> {
    pending: &'a PendingLocations,
    request_id: Uuid,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.request_id);
    }
}

/// Matches a ready order to the nearest idle courier.
///
/// `Ok(None)` means no acceptable courier right now; the scheduler retries on
/// its next tick.
pub async fn dispatch_order(state: &AppState, order_id: Uuid) -> Result<Option<Delivery>, AppError> {
    let start = Instant::now();
    let result = try_dispatch(state, order_id).await;

    let outcome = match &result {
        Ok(Some(_)) => "assigned",
        Ok(None) => "no_match",
        Err(_) => "error",
    };
    state
        .metrics
        .record_dispatch(outcome, start.elapsed().as_secs_f64());

    result
}

async fn try_dispatch(state: &AppState, order_id: Uuid) -> Result<Option<Delivery>, AppError> {
    let Some(_guard) = DispatchGuard::acquire(&state.dispatching, order_id) else {
        debug!(order_id = %order_id, "dispatch already in progress");
        return Ok(None);
    };

    let order = state
        .orders
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order.is_delivery() {
        debug!(order_id = %order_id, order_type = ?order.order_type, "not a delivery order");
        return Ok(None);
    }

    if state
        .deliveries
        .find_active_for_order(order_id)
        .await?
        .is_some()
    {
        debug!(order_id = %order_id, "order already has an active delivery");
        return Ok(None);
    }

    let idle = state.couriers.list_idle().await?;
    if idle.is_empty() {
        info!(order_id = %order_id, "no idle couriers");
        return Ok(None);
    }

    let partner = state.partners.find_partner(order.partner_id).await?;
    let Some((pickup, radius_km)) = partner.as_ref().and_then(|partner| partner.dispatch_area())
    else {
        warn!(
            order_id = %order_id,
            partner_id = %order.partner_id,
            "partner has no pickup coordinates or radius; assigning first idle courier"
        );
        return assign(state, &order, idle[0].courier_id, None).await;
    };

    let candidates = locate_candidates(state, &idle, order_id).await;
    let Some((winner, distance_km)) = nearest(pickup, &candidates) else {
        info!(order_id = %order_id, idle = idle.len(), "no idle courier position known");
        return Ok(None);
    };

    if distance_km > radius_km {
        info!(
            order_id = %order_id,
            courier_id = %winner.courier_id,
            distance_km,
            radius_km,
            "nearest courier outside delivery radius"
        );
        return Ok(None);
    }

    let leg_to_dropoff = order
        .dropoff
        .as_ref()
        .map(|dropoff| haversine_km(pickup, dropoff))
        .unwrap_or(0.0);

    debug!(
        order_id = %order_id,
        courier_id = %winner.courier_id,
        distance_km,
        live = winner.live,
        "nearest courier selected"
    );

    assign(
        state,
        &order,
        winner.courier_id,
        Some(distance_km + leg_to_dropoff),
    )
    .await
}

/// Polls every connected idle courier and falls back to stored samples.
///
/// Result keeps the listing order of `idle`.
async fn locate_candidates(
    state: &AppState,
    idle: &[CourierAvailability],
    order_id: Uuid,
) -> Vec<Candidate> {
    let mut polls: FuturesUnordered<_> = idle
        .iter()
        .enumerate()
        .filter(|(_, courier)| state.connections.is_connected(courier.courier_id))
        .map(|(index, courier)| async move {
            (index, request_location(state, courier.courier_id, order_id).await)
        })
        .collect();

    let mut live: HashMap<usize, GeoPoint> = HashMap::new();
    let ceiling = sleep(state.config.location_timeout);
    tokio::pin!(ceiling);

    let mut ceiling_reached = false;
    loop {
        tokio::select! {
            biased;
            next = polls.next() => match next {
                Some((index, Some(location))) => {
                    live.insert(index, location);
                }
                Some((_, None)) => {}
                None => break,
            },
            _ = &mut ceiling => {
                ceiling_reached = true;
                break;
            }
        }
    }
    if ceiling_reached {
        warn!(order_id = %order_id, outstanding = polls.len(), "location poll ceiling reached");
    }
    drop(polls);

    let mut candidates = Vec::with_capacity(idle.len());
    for (index, courier) in idle.iter().enumerate() {
        if let Some(location) = live.remove(&index) {
            candidates.push(Candidate {
                courier_id: courier.courier_id,
                location,
                live: true,
            });
            continue;
        }

        match state.couriers.last_location(courier.courier_id).await {
            Ok(Some(sample)) => candidates.push(Candidate {
                courier_id: courier.courier_id,
                location: sample.location,
                live: false,
            }),
            Ok(None) => {}
            Err(err) => {
                warn!(courier_id = %courier.courier_id, error = %err, "failed to load stored location");
            }
        }
    }

    candidates
}

/// Asks one courier for its position and waits for the correlated reply.
pub async fn request_location(
    state: &AppState,
    courier_id: Uuid,
    order_id: Uuid,
) -> Option<GeoPoint> {
    let (request_id, reply) = state.pending_locations.register(courier_id);
    let _pending = PendingRequest {
        pending: &state.pending_locations,
        request_id,
    };

    let frame = OutboundFrame::LocationRequest(LocationRequest {
        request_id,
        order_id,
    });

    let outcome = if !state.connections.send(courier_id, &frame) {
        "unreachable"
    } else {
        match timeout(state.config.location_timeout, reply).await {
            Ok(Ok(location)) if location.is_valid() => {
                state
                    .metrics
                    .location_requests_total
                    .with_label_values(&["answered"])
                    .inc();
                return Some(location);
            }
            Ok(Ok(_)) => "invalid",
            Ok(Err(_)) => "declined",
            Err(_) => "timeout",
        }
    };

    state
        .metrics
        .location_requests_total
        .with_label_values(&[outcome])
        .inc();
    debug!(courier_id = %courier_id, outcome, "no location from courier");
    None
}

async fn assign(
    state: &AppState,
    order: &Order,
    courier_id: Uuid,
    route_km: Option<f64>,
) -> Result<Option<Delivery>, AppError> {
    let estimated_delivery_at = route_km.map(|km| {
        Utc::now() + chrono::Duration::seconds((estimate_travel_minutes(km) * 60.0) as i64)
    });

    let delivery = match state
        .deliveries
        .create_delivery(NewDelivery {
            order_id: order.id,
            courier_id,
            estimated_delivery_at,
        })
        .await
    {
        Ok(delivery) => delivery,
        Err(AppError::Conflict(reason)) => {
            warn!(order_id = %order.id, reason, "delivery already exists; skipping assignment");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    info!(
        order_id = %order.id,
        courier_id = %courier_id,
        delivery_id = %delivery.id,
        "order assigned"
    );

    let active_deliveries = match state.deliveries.active_for_courier(courier_id).await {
        Ok(active) => active,
        Err(err) => {
            warn!(courier_id = %courier_id, error = %err, "failed to list active deliveries");
            vec![delivery.clone()]
        }
    };

    let notified = state.connections.send(
        courier_id,
        &OutboundFrame::DeliveryAssigned(DeliveryAssigned {
            delivery: delivery.clone(),
            active_deliveries,
        }),
    );
    if !notified {
        warn!(courier_id = %courier_id, delivery_id = %delivery.id, "assigned courier unreachable; picks it up on next sync");
    }

    state.notifier.delivery_changed(&delivery);
    send_tracking_email(state, order, &delivery).await;

    Ok(Some(delivery))
}

async fn send_tracking_email(state: &AppState, order: &Order, delivery: &Delivery) {
    let email = match state.orders.customer_email(order.customer_id).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            debug!(order_id = %order.id, "no customer email; skipping tracking link");
            return;
        }
        Err(err) => {
            warn!(order_id = %order.id, error = %err, "failed to resolve customer email");
            return;
        }
    };

    let token = TrackingClaims::new(delivery.id, order.id).encode(&state.tracking_signer);
    let tracking_url = format!("{}?token={token}", state.config.tracking_base_url);

    if let Err(err) = state
        .mailer
        .send_tracking_email(&email, order.id, &tracking_url)
        .await
    {
        warn!(order_id = %order.id, error = %err, "failed to send tracking email");
    }
}
