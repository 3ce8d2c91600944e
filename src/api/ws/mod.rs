//! Push channels. Each connection gets a [`ChannelHandle`] whose queue is
//! drained into the socket by a dedicated writer task; the handler itself only
//! reads.

pub mod chat;
pub mod courier;
pub mod orders;
pub mod partner;
pub mod tracking;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::AppError;
use crate::ports::Principal;
use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::OutboundFrame;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/courier", get(courier::courier_ws))
        .route("/ws/track", get(tracking::tracking_ws))
        .route("/ws/orders/:order_id", get(orders::order_ws))
        .route("/ws/partner", get(partner::partner_ws))
        .route("/ws/chat/:chat_id", get(chat::chat_ws))
}

/// Browsers cannot set headers on an upgrade request, so the token rides in the query.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub(crate) fn authenticate(state: &AppState, query: &TokenQuery) -> Result<Principal, AppError> {
    let token = query
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthenticated)?;

    state
        .token_verifier
        .verify(token)
        .ok_or(AppError::Unauthenticated)
}

pub(crate) enum Inbound {
    Text(String),
    Control,
}

/// One upgraded socket: a queue-fed writer task plus the read half.
pub(crate) struct Session {
    pub channel: ChannelHandle,
    stream: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
}

impl Session {
    pub fn open(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let (channel, rx) = ChannelHandle::new();
        let writer = tokio::spawn(write_frames(sink, rx));

        Self {
            channel,
            stream,
            writer,
        }
    }

    pub fn send(&self, frame: &OutboundFrame) {
        if let Err(err) = self.channel.send_json(frame) {
            debug!(channel_id = %self.channel.id(), kind = frame.kind(), error = %err, "reply dropped");
        }
    }

    /// Next inbound message, or `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        match self.stream.next().await? {
            Ok(Message::Text(text)) => Some(Inbound::Text(text.as_str().to_owned())),
            Ok(Message::Close(_)) => None,
            Ok(_) => Some(Inbound::Control),
            Err(err) => {
                debug!(channel_id = %self.channel.id(), error = %err, "socket read failed");
                None
            }
        }
    }

    pub fn close(self) {
        self.writer.abort();
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }

    let _ = sink.close().await;
}
