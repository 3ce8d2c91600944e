use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use tracing::debug;
use uuid::Uuid;

use crate::api::ws::{authenticate, Inbound, Session, TokenQuery};
use crate::error::AppError;
use crate::models::order::Order;
use crate::ports::{Principal, Role};
use crate::realtime::protocol::{split_frame, ConnectionConfirmed, OutboundFrame};
use crate::state::AppState;

/// Order-status feed for the customer who placed the order.
pub async fn order_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let principal = authenticate(&state, &query)?;
    let order = state
        .orders
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !may_watch(&principal, &order) {
        return Err(AppError::Unauthorized(format!(
            "order {order_id} is not visible to this user"
        )));
    }

    Ok(ws.on_upgrade(move |socket| run(socket, state, order)))
}

pub fn may_watch(principal: &Principal, order: &Order) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Customer => order.customer_id == principal.user_id,
        Role::Partner => order.partner_id == principal.user_id,
        Role::Courier => false,
    }
}

async fn run(socket: WebSocket, state: Arc<AppState>, order: Order) {
    let mut session = Session::open(socket);

    state
        .topics
        .orders
        .subscribe(order.id, session.channel.clone());
    session.send(&OutboundFrame::ConnectionConfirmed(ConnectionConfirmed::Order {
        order_id: order.id,
        status: order.status,
    }));

    while let Some(inbound) = session.recv().await {
        let Inbound::Text(text) = inbound else {
            continue;
        };

        match split_frame(&text) {
            Ok((kind, _)) if kind == "heartbeat" => session.send(&OutboundFrame::heartbeat_ack()),
            Ok((kind, _)) => session.send(&OutboundFrame::error(format!(
                "order channel does not accept {kind} frames"
            ))),
            Err(err) => session.send(&OutboundFrame::error(err.to_string())),
        }
    }

    state
        .topics
        .orders
        .unsubscribe(order.id, session.channel.id());
    session.close();
    debug!(order_id = %order.id, "order watcher disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::may_watch;
    use crate::models::order::{Order, OrderStatus, OrderType};
    use crate::ports::{Principal, Role};

    #[test]
    fn only_owner_partner_and_admin_may_watch() {
        let now = Utc::now();
        let order = Order {
            id: Uuid::from_u128(1),
            partner_id: Uuid::from_u128(2),
            customer_id: Uuid::from_u128(3),
            order_type: OrderType::Delivery,
            status: OrderStatus::Preparing,
            dropoff: None,
            created_at: now,
            updated_at: now,
        };
        let who = |id: u128, role: Role| Principal {
            user_id: Uuid::from_u128(id),
            role,
        };

        assert!(may_watch(&who(3, Role::Customer), &order));
        assert!(may_watch(&who(2, Role::Partner), &order));
        assert!(may_watch(&who(9, Role::Admin), &order));
        assert!(!may_watch(&who(4, Role::Customer), &order));
        assert!(!may_watch(&who(3, Role::Courier), &order));
    }
}
