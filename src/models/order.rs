use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Delivery,
    Pickup,
    DineIn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    Dispatched,
    Delivered,
    Failed,
    Canceled,
}

impl OrderStatus {
    /// Moves a partner may make on its own order before a courier takes over.
    pub fn partner_can_move_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Preparing)
                | (Preparing, ReadyForPickup)
                | (Pending | Confirmed | Preparing | ReadyForPickup, Canceled)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Failed | OrderStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub customer_id: Uuid,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub dropoff: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_delivery(&self) -> bool {
        self.order_type == OrderType::Delivery
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn partner_walks_order_to_ready() {
        assert!(Pending.partner_can_move_to(Confirmed));
        assert!(Confirmed.partner_can_move_to(Preparing));
        assert!(Preparing.partner_can_move_to(ReadyForPickup));
        assert!(ReadyForPickup.partner_can_move_to(Canceled));
    }

    #[test]
    fn partner_cannot_touch_courier_owned_statuses() {
        assert!(!ReadyForPickup.partner_can_move_to(Dispatched));
        assert!(!Dispatched.partner_can_move_to(Canceled));
        assert!(!Pending.partner_can_move_to(ReadyForPickup));
        assert!(!Delivered.partner_can_move_to(Canceled));
    }
}
