use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::observability::metrics::Metrics;
use crate::ports::{
    ChatDirectory, CourierRepository, DeliveryNotifier, DeliveryRepository, LogMailer, Mailer,
    OrderRepository, PartnerRepository, TokenVerifier,
};
use crate::realtime::connections::ConnectionRegistry;
use crate::realtime::pending::PendingLocations;
use crate::realtime::topics::TopicHub;
use crate::store::memory::MemoryStore;
use crate::tokens::{HmacTokenVerifier, TokenSigner};

/// Collaborators injected at startup.
#[derive(Clone)]
pub struct Ports {
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub partners: Arc<dyn PartnerRepository>,
    pub couriers: Arc<dyn CourierRepository>,
    pub chats: Arc<dyn ChatDirectory>,
    pub mailer: Arc<dyn Mailer>,
}

impl Ports {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            deliveries: store.clone(),
            orders: store.clone(),
            partners: store.clone(),
            couriers: store.clone(),
            chats: store,
            mailer: Arc::new(LogMailer),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}

pub struct AppState {
    pub config: Config,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub partners: Arc<dyn PartnerRepository>,
    pub couriers: Arc<dyn CourierRepository>,
    pub chats: Arc<dyn ChatDirectory>,
    pub mailer: Arc<dyn Mailer>,
    pub connections: ConnectionRegistry,
    pub topics: Arc<TopicHub>,
    pub notifier: Arc<dyn DeliveryNotifier>,
    pub pending_locations: PendingLocations,
    /// Orders with a dispatch attempt in progress.
    pub dispatching: DashMap<Uuid, ()>,
    pub tracking_signer: TokenSigner,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, ports: Ports) -> Self {
        let topics = Arc::new(TopicHub::new());

        Self {
            connections: ConnectionRegistry::new(config.stale_after),
            tracking_signer: TokenSigner::new(&config.tracking_secret),
            token_verifier: Arc::new(HmacTokenVerifier::new(&config.access_token_secret)),
            notifier: topics.clone(),
            topics,
            deliveries: ports.deliveries,
            orders: ports.orders,
            partners: ports.partners,
            couriers: ports.couriers,
            chats: ports.chats,
            mailer: ports.mailer,
            pending_locations: PendingLocations::new(),
            dispatching: DashMap::new(),
            metrics: Metrics::new(),
            config,
        }
    }

    pub fn refresh_connection_gauge(&self) {
        self.metrics
            .connected_couriers
            .set(self.connections.len() as i64);
    }
}
