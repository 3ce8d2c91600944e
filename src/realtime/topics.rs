use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::delivery::Delivery;
use crate::models::order::OrderStatus;
use crate::ports::DeliveryNotifier;
use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::{OrderPickedUp, OrderStatusChanged, OutboundFrame, StatusUpdate};

/// Subject id -> subscribed channels. Push-only fan-out with no replay.
pub struct TopicRegistry {
    name: &'static str,
    subjects: DashMap<Uuid, Vec<ChannelHandle>>,
}

impl TopicRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subjects: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self, subject_id: Uuid, channel: ChannelHandle) {
        let mut channels = self.subjects.entry(subject_id).or_default();
        if channels.iter().all(|existing| existing.id() != channel.id()) {
            channels.push(channel);
        }

        debug!(topic = self.name, subject_id = %subject_id, subscribers = channels.len(), "subscribed");
    }

    pub fn unsubscribe(&self, subject_id: Uuid, channel_id: Uuid) {
        if let Some(mut channels) = self.subjects.get_mut(&subject_id) {
            channels.retain(|existing| existing.id() != channel_id);
        }
        self.subjects
            .remove_if(&subject_id, |_, channels| channels.is_empty());

        debug!(topic = self.name, subject_id = %subject_id, "unsubscribed");
    }

    /// Sends `frame` to every open subscriber of `subject_id`.
    ///
    /// Closed channels are skipped, not pruned. Returns how many channels accepted
    /// the frame.
    pub fn broadcast(&self, subject_id: Uuid, frame: &OutboundFrame) -> usize {
        let Some(channels) = self
            .subjects
            .get(&subject_id)
            .map(|channels| channels.clone())
        else {
            return 0;
        };

        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(topic = self.name, error = %err, "failed to serialize broadcast frame");
                return 0;
            }
        };

        channels
            .iter()
            .filter(|channel| channel.is_open())
            .filter(|channel| channel.send_text(text.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self, subject_id: Uuid) -> usize {
        self.subjects
            .get(&subject_id)
            .map(|channels| channels.len())
            .unwrap_or(0)
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}

/// The four topic registries owned by the process.
pub struct TopicHub {
    pub tracking: TopicRegistry,
    pub orders: TopicRegistry,
    pub partners: TopicRegistry,
    pub chats: TopicRegistry,
}

impl TopicHub {
    pub fn new() -> Self {
        Self {
            tracking: TopicRegistry::new("tracking"),
            orders: TopicRegistry::new("orders"),
            partners: TopicRegistry::new("partners"),
            chats: TopicRegistry::new("chats"),
        }
    }
}

impl Default for TopicHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryNotifier for TopicHub {
    fn delivery_changed(&self, delivery: &Delivery) {
        let update = OutboundFrame::StatusUpdate(StatusUpdate::from(delivery));
        self.tracking.broadcast(delivery.id, &update);

        if let Some(status) = delivery.status.order_status() {
            self.orders.broadcast(
                delivery.order_id,
                &OutboundFrame::OrderStatus(OrderStatusChanged {
                    order_id: delivery.order_id,
                    status,
                }),
            );
        }
    }

    fn order_picked_up(&self, partner_id: Uuid, delivery: &Delivery) {
        let frame = OutboundFrame::OrderPickedUp(OrderPickedUp {
            order_id: delivery.order_id,
            delivery_id: delivery.id,
            courier_id: delivery.courier_id,
            picked_up_at: delivery.picked_up_at.unwrap_or(delivery.updated_at),
        });
        let reached = self.partners.broadcast(partner_id, &frame);

        debug!(partner_id = %partner_id, order_id = %delivery.order_id, reached, "pickup broadcast");
    }

    fn order_status_changed(&self, partner_id: Uuid, order_id: Uuid, status: OrderStatus) {
        let frame = OutboundFrame::OrderStatus(OrderStatusChanged { order_id, status });
        self.orders.broadcast(order_id, &frame);
        self.partners.broadcast(partner_id, &frame);
    }
}
