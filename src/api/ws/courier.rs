use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ws::{authenticate, Inbound, Session, TokenQuery};
use crate::config::Config;
use crate::engine::lifecycle;
use crate::error::AppError;
use crate::geo::jitter;
use crate::models::courier::{CourierLocation, GeoPoint};
use crate::ports::Role;
use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::{ConnectionConfirmed, CourierFrame, LocationUpdate, OutboundFrame};
use crate::state::AppState;

pub async fn courier_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let principal = authenticate(&state, &query)?;
    if principal.role != Role::Courier {
        return Err(AppError::Unauthorized(
            "courier channel requires the courier role".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| run(socket, state, principal.user_id)))
}

async fn run(socket: WebSocket, state: Arc<AppState>, courier_id: Uuid) {
    let mut session = Session::open(socket);
    let channel_id = session.channel.id();

    if let Some(previous) = state
        .connections
        .register(courier_id, session.channel.clone())
    {
        debug!(courier_id = %courier_id, replaced = %previous.id(), "courier reconnected");
    }
    state.refresh_connection_gauge();

    session.send(&OutboundFrame::ConnectionConfirmed(
        ConnectionConfirmed::Courier {
            courier_id,
            connected_at: Utc::now(),
        },
    ));
    send_current_deliveries(&state, &session.channel, courier_id).await;

    while let Some(inbound) = session.recv().await {
        state.connections.touch(courier_id);
        if let Inbound::Text(text) = inbound {
            handle_frame(&state, &session.channel, courier_id, &text).await;
        }
    }

    state.connections.release(courier_id, channel_id);
    state.refresh_connection_gauge();
    session.close();
    info!(courier_id = %courier_id, "courier disconnected");
}

fn reply(channel: &ChannelHandle, frame: &OutboundFrame) {
    if let Err(err) = channel.send_json(frame) {
        debug!(channel_id = %channel.id(), kind = frame.kind(), error = %err, "reply dropped");
    }
}

/// Handles one inbound courier frame. Failures are answered with an `error`
/// frame and never close the connection.
pub async fn handle_frame(state: &AppState, channel: &ChannelHandle, courier_id: Uuid, text: &str) {
    let frame = match CourierFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(courier_id = %courier_id, error = %err, "malformed courier frame");
            reply(channel, &OutboundFrame::error(err.to_string()));
            return;
        }
    };

    match frame {
        CourierFrame::StatusUpdate {
            delivery_id,
            status,
        } => {
            // The state machine pushes the resulting status_update itself.
            if let Err(err) =
                lifecycle::transition(state, delivery_id, status, courier_id, None).await
            {
                reply(channel, &OutboundFrame::error(err.to_string()));
            }
        }
        CourierFrame::LocationUpdate(coordinates) => {
            if let Err(err) = record_location(state, courier_id, coordinates.into()).await {
                reply(channel, &OutboundFrame::error(err.to_string()));
            }
        }
        CourierFrame::LocationResponse {
            request_id,
            location,
        } => {
            let location = GeoPoint::from(location);
            if !location.is_valid() {
                state.pending_locations.reject(courier_id, request_id);
                reply(channel, &OutboundFrame::error("coordinates out of range"));
                return;
            }

            if state
                .pending_locations
                .resolve(courier_id, request_id, location.clone())
            {
                // A live answer is also the freshest sample we have.
                if let Err(err) = record_location(state, courier_id, location).await {
                    warn!(courier_id = %courier_id, error = %err, "failed to store polled location");
                }
            }
        }
        CourierFrame::LocationError {
            request_id,
            message,
        } => {
            debug!(courier_id = %courier_id, request_id = ?request_id, message = ?message, "courier declined location request");
            state.pending_locations.reject(courier_id, request_id);
        }
        CourierFrame::Heartbeat => reply(channel, &OutboundFrame::heartbeat_ack()),
        CourierFrame::SyncDeliveries => send_current_deliveries(state, channel, courier_id).await,
    }
}

async fn send_current_deliveries(state: &AppState, channel: &ChannelHandle, courier_id: Uuid) {
    match state.deliveries.active_for_courier(courier_id).await {
        Ok(deliveries) => reply(channel, &OutboundFrame::CurrentDeliveries(deliveries)),
        Err(err) => {
            warn!(courier_id = %courier_id, error = %err, "failed to load current deliveries");
            reply(channel, &OutboundFrame::error("could not load deliveries"));
        }
    }
}

fn stored_position(config: &Config, reported: &GeoPoint) -> GeoPoint {
    if config.location_jitter_m > 0.0 {
        jitter(reported, config.location_jitter_m, &mut rand::thread_rng())
    } else {
        reported.clone()
    }
}

/// Stores a courier position and fans it out to the tracking topic of every
/// delivery the courier is working on.
pub async fn record_location(
    state: &AppState,
    courier_id: Uuid,
    reported: GeoPoint,
) -> Result<(), AppError> {
    if !reported.is_valid() {
        return Err(AppError::BadRequest(
            "coordinates out of range".to_string(),
        ));
    }

    let location = stored_position(&state.config, &reported);
    let recorded_at = Utc::now();

    state
        .couriers
        .record_location(CourierLocation {
            courier_id,
            location: location.clone(),
            recorded_at,
        })
        .await?;

    for delivery in state.deliveries.active_for_courier(courier_id).await? {
        state.topics.tracking.broadcast(
            delivery.id,
            &OutboundFrame::LocationUpdate(LocationUpdate {
                courier_id,
                delivery_id: delivery.id,
                latitude: location.lat,
                longitude: location.lng,
                recorded_at,
            }),
        );
    }

    Ok(())
}
