use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Unassigned,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Canceled,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 8] = [
        DeliveryStatus::Unassigned,
        DeliveryStatus::Assigned,
        DeliveryStatus::Accepted,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::Canceled,
    ];

    /// Statuses a courier may move a delivery to from `self`.
    pub fn successors(self) -> &'static [DeliveryStatus] {
        use DeliveryStatus::*;

        match self {
            Assigned => &[Accepted],
            Accepted => &[PickedUp],
            PickedUp => &[InTransit],
            InTransit => &[Delivered, Failed, Canceled],
            Unassigned | Delivered | Failed | Canceled => &[],
        }
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Canceled
        )
    }

    /// Order-level status implied by reaching `self`, if any.
    pub fn order_status(self) -> Option<OrderStatus> {
        match self {
            DeliveryStatus::PickedUp => Some(OrderStatus::Dispatched),
            DeliveryStatus::Delivered => Some(OrderStatus::Delivered),
            DeliveryStatus::Failed | DeliveryStatus::Canceled => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Unassigned => "unassigned",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| format!("unknown delivery status: {raw}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub proof_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_assigned_to(&self, courier_id: Uuid) -> bool {
        self.courier_id == Some(courier_id)
    }

    /// Moves to `status` and stamps the milestone timestamp it reaches.
    pub fn apply_status(&mut self, status: DeliveryStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;

        match status {
            DeliveryStatus::Assigned => self.assigned_at = Some(at),
            DeliveryStatus::Accepted => self.accepted_at = Some(at),
            DeliveryStatus::PickedUp => self.picked_up_at = Some(at),
            DeliveryStatus::Delivered => self.delivered_at = Some(at),
            _ => {}
        }
    }
}

/// Input for creating the delivery record of a freshly dispatched order.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus::{self, *};
    use crate::models::order::OrderStatus;

    const ALLOWED: [(DeliveryStatus, DeliveryStatus); 6] = [
        (Assigned, Accepted),
        (Accepted, PickedUp),
        (PickedUp, InTransit),
        (InTransit, Delivered),
        (InTransit, Failed),
        (InTransit, Canceled),
    ];

    #[test]
    fn only_the_forward_chain_is_allowed() {
        for from in DeliveryStatus::ALL {
            for to in DeliveryStatus::ALL {
                let expected = ALLOWED.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for status in [Delivered, Failed, Canceled] {
            assert!(status.is_terminal());
            assert!(status.successors().is_empty());
        }
        assert!(!InTransit.is_terminal());
    }

    #[test]
    fn maps_to_order_statuses() {
        assert_eq!(PickedUp.order_status(), Some(OrderStatus::Dispatched));
        assert_eq!(Delivered.order_status(), Some(OrderStatus::Delivered));
        assert_eq!(Failed.order_status(), Some(OrderStatus::Failed));
        assert_eq!(Canceled.order_status(), Some(OrderStatus::Failed));
        assert_eq!(Accepted.order_status(), None);
        assert_eq!(InTransit.order_status(), None);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("picked_up".parse::<DeliveryStatus>(), Ok(PickedUp));
        assert!("teleported".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&InTransit).unwrap();
        assert_eq!(json, "\"in_transit\"");
    }
}
