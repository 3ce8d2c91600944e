use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{CourierAvailability, CourierLocation};
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::models::order::{Order, OrderStatus, OrderType};
use crate::models::partner::Partner;
use crate::ports::{
    ChatDirectory, CourierRepository, DeliveryRepository, OrderRepository, PartnerRepository,
};
use crate::store::seed::Seed;

/// Process-local stand-in for the relational store.
///
/// `active_by_order` enforces one non-terminal delivery per order, which the
/// SQL schema would express as a partial unique index.
#[derive(Default)]
pub struct MemoryStore {
    deliveries: DashMap<Uuid, Delivery>,
    active_by_order: DashMap<Uuid, Uuid>,
    orders: DashMap<Uuid, Order>,
    partners: DashMap<Uuid, Partner>,
    customer_emails: DashMap<Uuid, String>,
    availability: DashMap<Uuid, CourierAvailability>,
    locations: DashMap<Uuid, Vec<CourierLocation>>,
    chat_members: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn insert_partner(&self, partner: Partner) {
        self.partners.insert(partner.id, partner);
    }

    pub fn insert_customer_email(&self, customer_id: Uuid, email: impl Into<String>) {
        self.customer_emails.insert(customer_id, email.into());
    }

    pub fn insert_availability(&self, availability: CourierAvailability) {
        self.availability.insert(availability.courier_id, availability);
    }

    pub fn insert_chat_member(&self, chat_id: Uuid, user_id: Uuid) {
        let mut members = self.chat_members.entry(chat_id).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    pub fn apply_seed(&self, seed: Seed) {
        for partner in seed.partners {
            self.insert_partner(partner);
        }
        for order in seed.orders {
            self.insert_order(order);
        }
        for courier in seed.couriers {
            self.insert_availability(courier);
        }
        for customer in seed.customers {
            self.insert_customer_email(customer.id, customer.email);
        }
        for chat in seed.chats {
            for member in chat.members {
                self.insert_chat_member(chat.id, member);
            }
        }
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    fn has_any_delivery(&self, order_id: Uuid) -> bool {
        self.deliveries
            .iter()
            .any(|entry| entry.value().order_id == order_id)
    }

    fn active_count(&self, courier_id: Uuid) -> usize {
        self.deliveries
            .iter()
            .filter(|entry| entry.value().is_assigned_to(courier_id) && entry.value().is_active())
            .count()
    }
}

#[async_trait]
impl DeliveryRepository for MemoryStore {
    async fn find_delivery(&self, id: Uuid) -> Result<Option<Delivery>, AppError> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_active_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>, AppError> {
        let Some(delivery_id) = self.active_by_order.get(&order_id).map(|entry| *entry.value())
        else {
            return Ok(None);
        };
        self.find_delivery(delivery_id).await
    }

    async fn create_delivery(&self, new: NewDelivery) -> Result<Delivery, AppError> {
        let now = Utc::now();
        let delivery = Delivery {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            courier_id: Some(new.courier_id),
            status: DeliveryStatus::Assigned,
            assigned_at: Some(now),
            accepted_at: None,
            picked_up_at: None,
            delivered_at: None,
            estimated_delivery_at: new.estimated_delivery_at,
            proof_image_url: None,
            created_at: now,
            updated_at: now,
        };

        match self.active_by_order.entry(new.order_id) {
            Entry::Occupied(existing) => Err(AppError::Conflict(format!(
                "order {} already has active delivery {}",
                new.order_id,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(delivery.id);
                self.deliveries.insert(delivery.id, delivery.clone());
                Ok(delivery)
            }
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        status: DeliveryStatus,
        at: DateTime<Utc>,
        proof_image_url: Option<String>,
    ) -> Result<Delivery, AppError> {
        let updated = {
            let mut delivery = self
                .deliveries
                .get_mut(&id)
                .ok_or(AppError::DeliveryNotFound(id))?;

            if delivery.status != expected {
                return Err(AppError::InvalidStatusTransition {
                    from: delivery.status,
                    to: status,
                });
            }

            delivery.apply_status(status, at);
            if proof_image_url.is_some() {
                delivery.proof_image_url = proof_image_url;
            }
            delivery.clone()
        };

        if status.is_terminal() {
            self.active_by_order
                .remove_if(&updated.order_id, |_, active| *active == id);
        }

        Ok(updated)
    }

    async fn active_for_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError> {
        let mut active: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().is_assigned_to(courier_id) && entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|delivery| delivery.created_at);
        Ok(active)
    }

    async fn all_for_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError> {
        let mut all: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().is_assigned_to(courier_id))
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn ready_without_delivery(&self, limit: usize) -> Result<Vec<Order>, AppError> {
        let mut ready: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                order.order_type == OrderType::Delivery
                    && order.status == OrderStatus::ReadyForPickup
            })
            .map(|entry| entry.value().clone())
            .collect();

        ready.retain(|order| !self.has_any_delivery(order.id));
        ready.sort_by_key(|order| order.created_at);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn active_for_partner(&self, partner_id: Uuid) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.value().partner_id == partner_id && !entry.value().status.is_final())
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn customer_email(&self, customer_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(self
            .customer_emails
            .get(&customer_id)
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl PartnerRepository for MemoryStore {
    async fn find_partner(&self, id: Uuid) -> Result<Option<Partner>, AppError> {
        Ok(self.partners.get(&id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl CourierRepository for MemoryStore {
    async fn find_availability(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<CourierAvailability>, AppError> {
        Ok(self
            .availability
            .get(&courier_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save_availability(
        &self,
        availability: CourierAvailability,
    ) -> Result<CourierAvailability, AppError> {
        self.availability
            .insert(availability.courier_id, availability.clone());
        Ok(availability)
    }

    async fn list_idle(&self) -> Result<Vec<CourierAvailability>, AppError> {
        let mut idle: Vec<CourierAvailability> = self
            .availability
            .iter()
            .filter(|entry| entry.value().is_ready_for_work())
            .map(|entry| entry.value().clone())
            .collect();

        idle.retain(|courier| self.active_count(courier.courier_id) == 0);
        // Longest-waiting courier first.
        idle.sort_by(|a, b| {
            a.last_status_change
                .cmp(&b.last_status_change)
                .then(a.courier_id.cmp(&b.courier_id))
        });
        Ok(idle)
    }

    async fn record_location(&self, sample: CourierLocation) -> Result<(), AppError> {
        self.locations
            .entry(sample.courier_id)
            .or_default()
            .push(sample);
        Ok(())
    }

    async fn last_location(&self, courier_id: Uuid) -> Result<Option<CourierLocation>, AppError> {
        Ok(self
            .locations
            .get(&courier_id)
            .and_then(|samples| samples.last().cloned()))
    }
}

#[async_trait]
impl ChatDirectory for MemoryStore {
    async fn is_participant(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .chat_members
            .get(&chat_id)
            .is_some_and(|members| members.contains(&user_id)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::error::AppError;
    use crate::models::courier::CourierAvailability;
    use crate::models::delivery::{DeliveryStatus, NewDelivery};
    use crate::models::order::{Order, OrderStatus, OrderType};
    use crate::ports::{ChatDirectory, CourierRepository, DeliveryRepository, OrderRepository};

    fn new_delivery(order_id: Uuid, courier_id: Uuid) -> NewDelivery {
        NewDelivery {
            order_id,
            courier_id,
            estimated_delivery_at: None,
        }
    }

    fn ready_order(id: u128, order_type: OrderType) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::from_u128(id),
            partner_id: Uuid::from_u128(500),
            customer_id: Uuid::from_u128(600),
            order_type,
            status: OrderStatus::ReadyForPickup,
            dropoff: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn courier(id: u128, available: bool, working: bool, waited_secs: i64) -> CourierAvailability {
        CourierAvailability {
            courier_id: Uuid::from_u128(id),
            city: "berlin".to_string(),
            is_available: available,
            is_working: working,
            last_status_change: Utc::now() - Duration::seconds(waited_secs),
        }
    }

    #[tokio::test]
    async fn second_active_delivery_for_an_order_conflicts() {
        let store = MemoryStore::new();
        let order = Uuid::from_u128(1);

        let first = store
            .create_delivery(new_delivery(order, Uuid::from_u128(10)))
            .await
            .unwrap();
        assert_eq!(first.status, DeliveryStatus::Assigned);

        let second = store
            .create_delivery(new_delivery(order, Uuid::from_u128(11)))
            .await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn terminal_delivery_frees_the_order() {
        let store = MemoryStore::new();
        let order = Uuid::from_u128(1);
        let first = store
            .create_delivery(new_delivery(order, Uuid::from_u128(10)))
            .await
            .unwrap();

        store
            .update_status(first.id, DeliveryStatus::Assigned, DeliveryStatus::Failed, Utc::now(), None)
            .await
            .unwrap();

        assert!(store.find_active_for_order(order).await.unwrap().is_none());
        assert!(store
            .create_delivery(new_delivery(order, Uuid::from_u128(11)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn stale_expected_status_is_rejected() {
        let store = MemoryStore::new();
        let delivery = store
            .create_delivery(new_delivery(Uuid::from_u128(1), Uuid::from_u128(10)))
            .await
            .unwrap();
        store
            .update_status(delivery.id, DeliveryStatus::Assigned, DeliveryStatus::Accepted, Utc::now(), None)
            .await
            .unwrap();

        let err = store
            .update_status(delivery.id, DeliveryStatus::Assigned, DeliveryStatus::Accepted, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidStatusTransition {
                from: DeliveryStatus::Accepted,
                to: DeliveryStatus::Accepted
            }
        ));
    }

    #[tokio::test]
    async fn chat_membership_is_per_chat() {
        let store = MemoryStore::new();
        store.insert_chat_member(Uuid::from_u128(1), Uuid::from_u128(10));
        store.insert_chat_member(Uuid::from_u128(1), Uuid::from_u128(10));

        assert!(store.is_participant(Uuid::from_u128(1), Uuid::from_u128(10)).await.unwrap());
        assert!(!store.is_participant(Uuid::from_u128(1), Uuid::from_u128(11)).await.unwrap());
        assert!(!store.is_participant(Uuid::from_u128(2), Uuid::from_u128(10)).await.unwrap());
    }

    #[tokio::test]
    async fn idle_excludes_busy_and_off_shift_couriers() {
        let store = MemoryStore::new();
        store.insert_availability(courier(1, true, true, 10));
        store.insert_availability(courier(2, true, true, 60));
        store.insert_availability(courier(3, false, true, 90));
        store.insert_availability(courier(4, true, false, 90));
        store
            .create_delivery(new_delivery(Uuid::from_u128(100), Uuid::from_u128(1)))
            .await
            .unwrap();

        let idle: Vec<Uuid> = store
            .list_idle()
            .await
            .unwrap()
            .into_iter()
            .map(|courier| courier.courier_id)
            .collect();

        assert_eq!(idle, vec![Uuid::from_u128(2)]);
    }

    #[tokio::test]
    async fn ready_orders_skip_those_with_deliveries_and_non_delivery_types() {
        let store = MemoryStore::new();
        store.insert_order(ready_order(1, OrderType::Delivery));
        store.insert_order(ready_order(2, OrderType::Pickup));
        store.insert_order(ready_order(3, OrderType::Delivery));
        store
            .create_delivery(new_delivery(Uuid::from_u128(3), Uuid::from_u128(9)))
            .await
            .unwrap();

        let ready = store.ready_without_delivery(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, Uuid::from_u128(1));
        assert!(store.ready_without_delivery(0).await.unwrap().is_empty());
    }
}
