use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::OutboundFrame;

#[derive(Debug, Clone)]
pub struct CourierConnection {
    pub courier_id: Uuid,
    pub channel: ChannelHandle,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// One live push channel per courier. Last registration wins.
///
/// Failures never surface as errors: an unreachable courier is reported as
/// `false` and its entry is dropped.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, CourierConnection>,
    stale_after: chrono::Duration,
}

impl ConnectionRegistry {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::minutes(3)),
        }
    }

    /// Returns the channel this registration replaced, if any.
    pub fn register(&self, courier_id: Uuid, channel: ChannelHandle) -> Option<ChannelHandle> {
        let now = Utc::now();
        let previous = self.connections.insert(
            courier_id,
            CourierConnection {
                courier_id,
                channel,
                connected_at: now,
                last_activity: now,
            },
        );

        info!(
            courier_id = %courier_id,
            replaced = previous.is_some(),
            "courier connection registered"
        );

        previous.map(|connection| connection.channel)
    }

    pub fn disconnect(&self, courier_id: Uuid) -> bool {
        let removed = self.connections.remove(&courier_id).is_some();
        if removed {
            info!(courier_id = %courier_id, "courier disconnected");
        }
        removed
    }

    /// Removes the entry only if it still belongs to `channel_id`.
    ///
    /// A socket closing after its courier reconnected elsewhere must not evict
    /// the newer registration.
    pub fn release(&self, courier_id: Uuid, channel_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(&courier_id, |_, connection| {
                connection.channel.id() == channel_id
            })
            .is_some();

        if removed {
            info!(courier_id = %courier_id, "courier channel closed");
        } else {
            debug!(courier_id = %courier_id, "closed channel was already replaced");
        }
        removed
    }

    pub fn is_connected(&self, courier_id: Uuid) -> bool {
        self.connections.contains_key(&courier_id)
    }

    pub fn list_connected(&self) -> Vec<Uuid> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn last_activity(&self, courier_id: Uuid) -> Option<DateTime<Utc>> {
        self.connections
            .get(&courier_id)
            .map(|connection| connection.last_activity)
    }

    pub fn touch(&self, courier_id: Uuid) -> bool {
        self.touch_at(courier_id, Utc::now())
    }

    fn touch_at(&self, courier_id: Uuid, at: DateTime<Utc>) -> bool {
        match self.connections.get_mut(&courier_id) {
            Some(mut connection) => {
                connection.last_activity = at;
                true
            }
            None => false,
        }
    }

    pub fn send(&self, courier_id: Uuid, frame: &OutboundFrame) -> bool {
        // Clone the handle out so no shard lock is held while removing.
        let Some(channel) = self
            .connections
            .get(&courier_id)
            .map(|connection| connection.channel.clone())
        else {
            debug!(courier_id = %courier_id, frame = frame.kind(), "courier not connected");
            return false;
        };

        if !channel.is_open() {
            warn!(courier_id = %courier_id, frame = frame.kind(), "courier channel closed; dropping connection");
            self.release(courier_id, channel.id());
            return false;
        }

        match channel.send_json(frame) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    courier_id = %courier_id,
                    frame = frame.kind(),
                    error = %err,
                    "send to courier failed; dropping connection"
                );
                self.release(courier_id, channel.id());
                false
            }
        }
    }

    /// Disconnects every courier idle past the threshold or whose channel is closed.
    pub fn sweep_stale(&self) -> Vec<Uuid> {
        self.sweep_stale_at(Utc::now())
    }

    pub fn sweep_stale_at(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let stale: Vec<(Uuid, Uuid)> = self
            .connections
            .iter()
            .filter(|entry| {
                let connection = entry.value();
                now - connection.last_activity > self.stale_after || !connection.channel.is_open()
            })
            .map(|entry| (*entry.key(), entry.value().channel.id()))
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for (courier_id, channel_id) in stale {
            if self.release(courier_id, channel_id) {
                removed.push(courier_id);
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "swept stale courier connections");
        }
        removed
    }
}
