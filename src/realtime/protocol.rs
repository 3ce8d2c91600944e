//! JSON frames exchanged over the push channels.
//!
//! Outbound frames are `{"type": ..., "payload": ...}`. Inbound frames name their
//! kind in either `type` or `action` and carry their fields next to it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Coordinates> for GeoPoint {
    fn from(value: Coordinates) -> Self {
        GeoPoint {
            lat: value.latitude,
            lng: value.longitude,
        }
    }
}

impl From<&GeoPoint> for Coordinates {
    fn from(value: &GeoPoint) -> Self {
        Coordinates {
            latitude: value.lat,
            longitude: value.lng,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    ConnectionConfirmed(ConnectionConfirmed),
    CurrentDeliveries(Vec<Delivery>),
    DeliveryAssigned(DeliveryAssigned),
    StatusUpdate(StatusUpdate),
    LocationUpdate(LocationUpdate),
    LocationRequest(LocationRequest),
    HeartbeatAck(HeartbeatAck),
    Error(ErrorPayload),
    Orders(Vec<Order>),
    OrderPickedUp(OrderPickedUp),
    OrderStatus(OrderStatusChanged),
    ChatMessage(ChatMessage),
}

impl OutboundFrame {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundFrame::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn heartbeat_ack() -> Self {
        OutboundFrame::HeartbeatAck(HeartbeatAck {
            server_time: Utc::now(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::ConnectionConfirmed(_) => "connection_confirmed",
            OutboundFrame::CurrentDeliveries(_) => "current_deliveries",
            OutboundFrame::DeliveryAssigned(_) => "delivery_assigned",
            OutboundFrame::StatusUpdate(_) => "status_update",
            OutboundFrame::LocationUpdate(_) => "location_update",
            OutboundFrame::LocationRequest(_) => "location_request",
            OutboundFrame::HeartbeatAck(_) => "heartbeat_ack",
            OutboundFrame::Error(_) => "error",
            OutboundFrame::Orders(_) => "orders",
            OutboundFrame::OrderPickedUp(_) => "order_picked_up",
            OutboundFrame::OrderStatus(_) => "order_status",
            OutboundFrame::ChatMessage(_) => "chat_message",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConnectionConfirmed {
    Courier {
        courier_id: Uuid,
        connected_at: DateTime<Utc>,
    },
    Tracking(TrackingSnapshot),
    Order {
        order_id: Uuid,
        status: OrderStatus,
    },
    Partner {
        partner_id: Uuid,
    },
    Chat {
        chat_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub status: DeliveryStatus,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub partner: Option<PartnerPin>,
    pub courier_location: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartnerPin {
    pub name: String,
    pub location: Option<Coordinates>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAssigned {
    pub delivery: Delivery,
    pub active_deliveries: Vec<Delivery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub status: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<&Delivery> for StatusUpdate {
    fn from(delivery: &Delivery) -> Self {
        StatusUpdate {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            status: delivery.status,
            updated_at: delivery.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationUpdate {
    pub courier_id: Uuid,
    pub delivery_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationRequest {
    pub request_id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPickedUp {
    pub order_id: Uuid,
    pub delivery_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub picked_up_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusChanged {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no type or action")]
    MissingKind,

    #[error("unsupported frame type: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

/// Splits a raw inbound frame into its kind and remaining fields.
pub fn split_frame(text: &str) -> Result<(String, Map<String, Value>), FrameError> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
        return Err(FrameError::NotAnObject);
    };

    let kind = match fields.remove("type").or_else(|| fields.remove("action")) {
        Some(Value::String(kind)) => kind,
        _ => return Err(FrameError::MissingKind),
    };

    Ok((kind, fields))
}

fn body<T: DeserializeOwned>(kind: &str, fields: Map<String, Value>) -> Result<T, FrameError> {
    serde_json::from_value(Value::Object(fields)).map_err(|source| FrameError::Payload {
        kind: kind.to_string(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum CourierFrame {
    StatusUpdate {
        delivery_id: Uuid,
        status: DeliveryStatus,
    },
    LocationUpdate(Coordinates),
    LocationResponse {
        request_id: Option<Uuid>,
        location: Coordinates,
    },
    LocationError {
        request_id: Option<Uuid>,
        message: Option<String>,
    },
    Heartbeat,
    SyncDeliveries,
}

#[derive(Deserialize)]
struct StatusUpdateBody {
    #[serde(alias = "deliveryId")]
    delivery_id: Uuid,
    status: DeliveryStatus,
}

#[derive(Deserialize)]
struct LocationPayload {
    latitude: f64,
    longitude: f64,
    #[serde(default, alias = "requestId")]
    request_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct LocationResponseBody {
    #[serde(default, alias = "requestId")]
    request_id: Option<Uuid>,
    payload: LocationPayload,
}

#[derive(Deserialize)]
struct LocationErrorBody {
    #[serde(default, alias = "requestId")]
    request_id: Option<Uuid>,
    #[serde(default)]
    message: Option<String>,
}

impl CourierFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (kind, fields) = split_frame(text)?;

        match kind.as_str() {
            "status_update" => {
                let body: StatusUpdateBody = body(&kind, fields)?;
                Ok(CourierFrame::StatusUpdate {
                    delivery_id: body.delivery_id,
                    status: body.status,
                })
            }
            "location_update" => Ok(CourierFrame::LocationUpdate(body(&kind, fields)?)),
            "location_response" => {
                let body: LocationResponseBody = body(&kind, fields)?;
                Ok(CourierFrame::LocationResponse {
                    request_id: body.request_id.or(body.payload.request_id),
                    location: Coordinates {
                        latitude: body.payload.latitude,
                        longitude: body.payload.longitude,
                    },
                })
            }
            "location_error" => {
                let body: LocationErrorBody = body(&kind, fields)?;
                Ok(CourierFrame::LocationError {
                    request_id: body.request_id,
                    message: body.message,
                })
            }
            "heartbeat" => Ok(CourierFrame::Heartbeat),
            "sync_deliveries" => Ok(CourierFrame::SyncDeliveries),
            _ => Err(FrameError::UnknownKind(kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartnerFrame {
    StatusUpdate { order_id: Uuid, status: OrderStatus },
    Heartbeat,
}

#[derive(Deserialize)]
struct PartnerStatusBody {
    #[serde(alias = "orderId")]
    order_id: Uuid,
    status: OrderStatus,
}

impl PartnerFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (kind, fields) = split_frame(text)?;

        match kind.as_str() {
            "status_update" => {
                let body: PartnerStatusBody = body(&kind, fields)?;
                Ok(PartnerFrame::StatusUpdate {
                    order_id: body.order_id,
                    status: body.status,
                })
            }
            "heartbeat" => Ok(PartnerFrame::Heartbeat),
            _ => Err(FrameError::UnknownKind(kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatFrame {
    Message { text: String },
    Heartbeat,
}

#[derive(Deserialize)]
struct ChatBody {
    text: String,
}

impl ChatFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (kind, fields) = split_frame(text)?;

        match kind.as_str() {
            "message" => {
                let body: ChatBody = body(&kind, fields)?;
                Ok(ChatFrame::Message { text: body.text })
            }
            "heartbeat" => Ok(ChatFrame::Heartbeat),
            _ => Err(FrameError::UnknownKind(kind)),
        }
    }
}
