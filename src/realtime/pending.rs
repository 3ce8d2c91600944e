//! Correlates `location_request` frames with the courier's reply.
//!
//! Flow:
//! 1. the dispatcher registers a request and gets a one-shot receiver
//! 2. the request id travels in the `location_request` frame
//! 3. the courier channel hands the echoed id to `resolve` or `reject`
//! 4. the dispatcher awaits the receiver under a timeout and cancels on expiry

use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

struct PendingLocation {
    courier_id: Uuid,
    sender: oneshot::Sender<GeoPoint>,
    created_at: Instant,
}

#[derive(Default)]
pub struct PendingLocations {
    pending: DashMap<Uuid, PendingLocation>,
}

impl PendingLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, courier_id: Uuid) -> (Uuid, oneshot::Receiver<GeoPoint>) {
        let request_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();

        self.pending.insert(
            request_id,
            PendingLocation {
                courier_id,
                sender,
                created_at: Instant::now(),
            },
        );

        debug!(request_id = %request_id, courier_id = %courier_id, "location request registered");
        (request_id, receiver)
    }

    /// Delivers a courier's position to the waiting dispatcher.
    ///
    /// Replies without a request id resolve that courier's oldest outstanding
    /// request. Returns false for orphans: unknown, expired or foreign ids.
    pub fn resolve(&self, courier_id: Uuid, request_id: Option<Uuid>, location: GeoPoint) -> bool {
        let Some(pending) = self.take(courier_id, request_id) else {
            debug!(courier_id = %courier_id, request_id = ?request_id, "orphan location response dropped");
            return false;
        };

        let elapsed_ms = pending.created_at.elapsed().as_millis();
        match pending.sender.send(location) {
            Ok(()) => {
                debug!(courier_id = %courier_id, elapsed_ms, "location request answered");
                true
            }
            Err(_) => {
                debug!(courier_id = %courier_id, "location arrived after the dispatcher gave up");
                false
            }
        }
    }

    /// Resolves a request as "no answer" so the dispatcher stops waiting early.
    pub fn reject(&self, courier_id: Uuid, request_id: Option<Uuid>) -> bool {
        // Dropping the sender wakes the receiver with an error.
        self.take(courier_id, request_id).is_some()
    }

    pub fn cancel(&self, request_id: Uuid) {
        self.pending.remove(&request_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn take(&self, courier_id: Uuid, request_id: Option<Uuid>) -> Option<PendingLocation> {
        let request_id = match request_id {
            Some(id) => id,
            None => self.oldest_for(courier_id)?,
        };

        let taken = self
            .pending
            .remove_if(&request_id, |_, pending| pending.courier_id == courier_id);

        if taken.is_none() && self.pending.contains_key(&request_id) {
            warn!(
                courier_id = %courier_id,
                request_id = %request_id,
                "courier answered a location request addressed to someone else"
            );
        }

        taken.map(|(_, pending)| pending)
    }

    fn oldest_for(&self, courier_id: Uuid) -> Option<Uuid> {
        self.pending
            .iter()
            .filter(|entry| entry.value().courier_id == courier_id)
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| *entry.key())
    }
}
