use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ws::{authenticate, Inbound, Session, TokenQuery};
use crate::engine::dispatch::dispatch_order;
use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::order::OrderStatus;
use crate::ports::Role;
use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::{ConnectionConfirmed, OutboundFrame, PartnerFrame};
use crate::state::AppState;

pub async fn partner_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let principal = authenticate(&state, &query)?;
    if principal.role != Role::Partner {
        return Err(AppError::Unauthorized(
            "partner channel requires the partner role".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| run(socket, state, principal.user_id)))
}

async fn run(socket: WebSocket, state: Arc<AppState>, partner_id: Uuid) {
    let mut session = Session::open(socket);

    state
        .topics
        .partners
        .subscribe(partner_id, session.channel.clone());
    session.send(&OutboundFrame::ConnectionConfirmed(
        ConnectionConfirmed::Partner { partner_id },
    ));

    match state.orders.active_for_partner(partner_id).await {
        Ok(orders) => session.send(&OutboundFrame::Orders(orders)),
        Err(err) => {
            warn!(partner_id = %partner_id, error = %err, "failed to load partner orders");
            session.send(&OutboundFrame::error("could not load orders"));
        }
    }
    info!(partner_id = %partner_id, "partner connected");

    while let Some(inbound) = session.recv().await {
        if let Inbound::Text(text) = inbound {
            handle_frame(&state, &session.channel, partner_id, &text).await;
        }
    }

    state
        .topics
        .partners
        .unsubscribe(partner_id, session.channel.id());
    session.close();
    debug!(partner_id = %partner_id, "partner disconnected");
}

pub async fn handle_frame(
    state: &Arc<AppState>,
    channel: &ChannelHandle,
    partner_id: Uuid,
    text: &str,
) {
    let reply = |frame: OutboundFrame| {
        if let Err(err) = channel.send_json(&frame) {
            debug!(partner_id = %partner_id, error = %err, "reply dropped");
        }
    };

    match PartnerFrame::parse(text) {
        Ok(PartnerFrame::Heartbeat) => reply(OutboundFrame::heartbeat_ack()),
        Ok(PartnerFrame::StatusUpdate { order_id, status }) => {
            match lifecycle::advance_order(state, partner_id, order_id, status).await {
                Ok(order) if status == OrderStatus::ReadyForPickup && order.is_delivery() => {
                    // Try right away instead of waiting for the next scheduler tick.
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(err) = dispatch_order(&state, order_id).await {
                            warn!(order_id = %order_id, error = %err, "immediate dispatch failed");
                        }
                    });
                }
                Ok(_) => {}
                Err(err) => reply(OutboundFrame::error(err.to_string())),
            }
        }
        Err(err) => {
            debug!(partner_id = %partner_id, error = %err, "malformed partner frame");
            reply(OutboundFrame::error(err.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::handle_frame;
    use crate::config::Config;
    use crate::models::courier::CourierAvailability;
    use crate::models::order::{Order, OrderStatus, OrderType};
    use crate::ports::DeliveryRepository;
    use crate::realtime::channel::ChannelHandle;
    use crate::state::{AppState, Ports};
    use crate::store::memory::MemoryStore;

    const PARTNER: u128 = 1;
    const ORDER: u128 = 2;

    fn setup(status: OrderStatus) -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_order(Order {
            id: Uuid::from_u128(ORDER),
            partner_id: Uuid::from_u128(PARTNER),
            customer_id: Uuid::from_u128(3),
            order_type: OrderType::Delivery,
            status,
            dropoff: None,
            created_at: now,
            updated_at: now,
        });
        store.insert_availability(CourierAvailability {
            courier_id: Uuid::from_u128(4),
            city: "porto".to_string(),
            is_available: true,
            is_working: true,
            last_status_change: now,
        });
        let state = Arc::new(AppState::new(
            Config::default(),
            Ports::in_memory(store.clone()),
        ));
        (store, state)
    }

    #[tokio::test]
    async fn ready_for_pickup_triggers_dispatch() {
        let (store, state) = setup(OrderStatus::Preparing);
        let (channel, mut rx) = ChannelHandle::new();

        let frame = json!({"type": "status_update", "orderId": Uuid::from_u128(ORDER), "status": "ready_for_pickup"});
        handle_frame(&state, &channel, Uuid::from_u128(PARTNER), &frame.to_string()).await;
        assert!(rx.try_recv().is_err());

        let mut assigned = None;
        for _ in 0..50 {
            assigned = store
                .find_active_for_order(Uuid::from_u128(ORDER))
                .await
                .unwrap();
            if assigned.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(assigned.unwrap().courier_id, Some(Uuid::from_u128(4)));
    }

    #[tokio::test]
    async fn illegal_move_is_answered_with_error() {
        let (_, state) = setup(OrderStatus::Pending);
        let (channel, mut rx) = ChannelHandle::new();

        let frame = json!({"type": "status_update", "order_id": Uuid::from_u128(ORDER), "status": "delivered"});
        handle_frame(&state, &channel, Uuid::from_u128(PARTNER), &frame.to_string()).await;

        let reply: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
    }
}
