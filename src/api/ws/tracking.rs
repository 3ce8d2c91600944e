use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use tracing::{debug, info};

use crate::api::ws::{Inbound, Session, TokenQuery};
use crate::error::AppError;
use crate::realtime::protocol::{
    split_frame, ConnectionConfirmed, Coordinates, OutboundFrame, PartnerPin, TrackingSnapshot,
};
use crate::state::AppState;
use crate::tokens::TrackingClaims;

/// Customer-facing live tracking, gated by the signed link from the tracking email.
pub async fn tracking_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let token = query.token.as_deref().ok_or(AppError::Unauthenticated)?;
    let claims = TrackingClaims::decode(token, &state.tracking_signer).map_err(|err| {
        debug!(error = %err, "rejected tracking token");
        AppError::Unauthenticated
    })?;

    let snapshot = tracking_snapshot(&state, &claims).await?;
    Ok(ws.on_upgrade(move |socket| run(socket, state, snapshot)))
}

pub async fn tracking_snapshot(
    state: &AppState,
    claims: &TrackingClaims,
) -> Result<TrackingSnapshot, AppError> {
    let delivery = state
        .deliveries
        .find_delivery(claims.delivery_id)
        .await?
        .ok_or(AppError::DeliveryNotFound(claims.delivery_id))?;

    if delivery.order_id != claims.order_id {
        return Err(AppError::Unauthenticated);
    }

    let partner = match state.orders.find_order(delivery.order_id).await? {
        Some(order) => state.partners.find_partner(order.partner_id).await?,
        None => None,
    };

    let courier_location = match delivery.courier_id {
        Some(courier_id) => state
            .couriers
            .last_location(courier_id)
            .await?
            .map(|sample| Coordinates::from(&sample.location)),
        None => None,
    };

    Ok(TrackingSnapshot {
        delivery_id: delivery.id,
        order_id: delivery.order_id,
        status: delivery.status,
        estimated_delivery_at: delivery.estimated_delivery_at,
        partner: partner.map(|partner| PartnerPin {
            location: partner.location.as_ref().map(Coordinates::from),
            name: partner.name,
            logo_url: partner.logo_url,
        }),
        courier_location,
    })
}

async fn run(socket: WebSocket, state: Arc<AppState>, snapshot: TrackingSnapshot) {
    let mut session = Session::open(socket);
    let delivery_id = snapshot.delivery_id;

    state
        .topics
        .tracking
        .subscribe(delivery_id, session.channel.clone());
    session.send(&OutboundFrame::ConnectionConfirmed(
        ConnectionConfirmed::Tracking(snapshot),
    ));
    info!(delivery_id = %delivery_id, "tracking client connected");

    while let Some(inbound) = session.recv().await {
        let Inbound::Text(text) = inbound else {
            continue;
        };

        match split_frame(&text) {
            Ok((kind, _)) if kind == "heartbeat" => session.send(&OutboundFrame::heartbeat_ack()),
            Ok((kind, _)) => session.send(&OutboundFrame::error(format!(
                "tracking channel does not accept {kind} frames"
            ))),
            Err(err) => session.send(&OutboundFrame::error(err.to_string())),
        }
    }

    state
        .topics
        .tracking
        .unsubscribe(delivery_id, session.channel.id());
    session.close();
    debug!(delivery_id = %delivery_id, "tracking client disconnected");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::tracking_snapshot;
    use crate::config::Config;
    use crate::error::AppError;
    use crate::models::courier::{CourierLocation, GeoPoint};
    use crate::models::delivery::{DeliveryStatus, NewDelivery};
    use crate::models::order::{Order, OrderStatus, OrderType};
    use crate::models::partner::Partner;
    use crate::ports::{CourierRepository, DeliveryRepository};
    use crate::state::{AppState, Ports};
    use crate::store::memory::MemoryStore;
    use crate::tokens::TrackingClaims;

    #[tokio::test]
    async fn snapshot_carries_partner_pin_and_courier_position() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_partner(Partner {
            id: Uuid::from_u128(1),
            name: "Tasca do Chico".to_string(),
            city: "lisbon".to_string(),
            location: Some(GeoPoint { lat: 38.71, lng: -9.14 }),
            max_delivery_distance_km: Some(3.0),
            logo_url: Some("https://cdn.example.com/tasca.png".to_string()),
        });
        store.insert_order(Order {
            id: Uuid::from_u128(2),
            partner_id: Uuid::from_u128(1),
            customer_id: Uuid::from_u128(3),
            order_type: OrderType::Delivery,
            status: OrderStatus::ReadyForPickup,
            dropoff: None,
            created_at: now,
            updated_at: now,
        });
        let delivery = store
            .create_delivery(NewDelivery {
                order_id: Uuid::from_u128(2),
                courier_id: Uuid::from_u128(4),
                estimated_delivery_at: None,
            })
            .await
            .unwrap();
        store
            .record_location(CourierLocation {
                courier_id: Uuid::from_u128(4),
                location: GeoPoint { lat: 38.72, lng: -9.13 },
                recorded_at: now,
            })
            .await
            .unwrap();

        let state = AppState::new(Config::default(), Ports::in_memory(store));
        let claims = TrackingClaims::new(delivery.id, Uuid::from_u128(2));
        let snapshot = tracking_snapshot(&state, &claims).await.unwrap();

        assert_eq!(snapshot.status, DeliveryStatus::Assigned);
        let partner = snapshot.partner.unwrap();
        assert_eq!(partner.name, "Tasca do Chico");
        assert_eq!(partner.location.unwrap().latitude, 38.71);
        assert_eq!(snapshot.courier_location.unwrap().longitude, -9.13);

        let mismatched = TrackingClaims::new(delivery.id, Uuid::from_u128(99));
        assert!(matches!(
            tracking_snapshot(&state, &mismatched).await,
            Err(AppError::Unauthenticated)
        ));
    }
}
