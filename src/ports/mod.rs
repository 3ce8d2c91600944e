//! Seams to the collaborators this service consumes but does not own.
//!
//! The relational store, account service and mailer live elsewhere; these
//! traits are the calls the dispatch core makes against them.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{CourierAvailability, CourierLocation};
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::Partner;

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn find_delivery(&self, id: Uuid) -> Result<Option<Delivery>, AppError>;

    async fn find_active_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>, AppError>;

    /// Fails with `Conflict` if the order already has a non-terminal delivery.
    async fn create_delivery(&self, new: NewDelivery) -> Result<Delivery, AppError>;

    /// Writes `status` only if the stored status still equals `expected`;
    /// otherwise fails with `InvalidStatusTransition` from the stored status.
    async fn update_status(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        status: DeliveryStatus,
        at: DateTime<Utc>,
        proof_image_url: Option<String>,
    ) -> Result<Delivery, AppError>;

    async fn active_for_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError>;

    async fn all_for_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, AppError>;

    /// Delivery-type orders that are ready for pickup and have no delivery record.
    async fn ready_without_delivery(&self, limit: usize) -> Result<Vec<Order>, AppError>;

    async fn active_for_partner(&self, partner_id: Uuid) -> Result<Vec<Order>, AppError>;

    async fn customer_email(&self, customer_id: Uuid) -> Result<Option<String>, AppError>;
}

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    async fn find_partner(&self, id: Uuid) -> Result<Option<Partner>, AppError>;
}

#[async_trait]
pub trait CourierRepository: Send + Sync {
    async fn find_availability(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<CourierAvailability>, AppError>;

    async fn save_availability(
        &self,
        availability: CourierAvailability,
    ) -> Result<CourierAvailability, AppError>;

    /// Available, working couriers with zero non-terminal deliveries, in listing order.
    async fn list_idle(&self) -> Result<Vec<CourierAvailability>, AppError>;

    async fn record_location(&self, sample: CourierLocation) -> Result<(), AppError>;

    async fn last_location(&self, courier_id: Uuid) -> Result<Option<CourierLocation>, AppError>;
}

#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn is_participant(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_tracking_email(
        &self,
        to: &str,
        order_id: Uuid,
        tracking_url: &str,
    ) -> Result<(), AppError>;
}

/// Mailer that only logs; stands in when no mail transport is wired up.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_tracking_email(
        &self,
        to: &str,
        order_id: Uuid,
        tracking_url: &str,
    ) -> Result<(), AppError> {
        info!(to, order_id = %order_id, tracking_url, "tracking email queued");
        Ok(())
    }
}

/// Outbound notifications raised by the delivery state machine.
///
/// Implementations must not fail the caller: delivery is best-effort.
pub trait DeliveryNotifier: Send + Sync {
    fn delivery_changed(&self, delivery: &Delivery);

    fn order_picked_up(&self, partner_id: Uuid, delivery: &Delivery);

    fn order_status_changed(&self, partner_id: Uuid, order_id: Uuid, status: OrderStatus);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Courier,
    Partner,
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Courier => "courier",
            Role::Partner => "partner",
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "courier" => Ok(Role::Courier),
            "partner" => Ok(Role::Partner),
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Principal>;
}
