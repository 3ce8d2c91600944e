use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::ws::{authenticate, Inbound, Session, TokenQuery};
use crate::error::AppError;
use crate::ports::{Principal, Role};
use crate::realtime::channel::ChannelHandle;
use crate::realtime::protocol::{ChatFrame, ChatMessage, ConnectionConfirmed, OutboundFrame};
use crate::state::AppState;

const MAX_MESSAGE_CHARS: usize = 2000;

pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let principal = authenticate(&state, &query)?;
    if !may_join(&state, &principal, chat_id).await? {
        return Err(AppError::Unauthorized(format!(
            "user {} is not a participant of chat {chat_id}",
            principal.user_id
        )));
    }

    info!(
        chat_id = %chat_id,
        user_id = %principal.user_id,
        role = principal.role.as_str(),
        "chat participant joined"
    );
    Ok(ws.on_upgrade(move |socket| run(socket, state, chat_id, principal.user_id)))
}

/// Admins may read any chat; everyone else must be listed as a participant.
pub async fn may_join(
    state: &AppState,
    principal: &Principal,
    chat_id: Uuid,
) -> Result<bool, AppError> {
    if principal.role == Role::Admin {
        return Ok(true);
    }
    state.chats.is_participant(chat_id, principal.user_id).await
}

async fn run(socket: WebSocket, state: Arc<AppState>, chat_id: Uuid, user_id: Uuid) {
    let mut session = Session::open(socket);

    state
        .topics
        .chats
        .subscribe(chat_id, session.channel.clone());
    session.send(&OutboundFrame::ConnectionConfirmed(ConnectionConfirmed::Chat {
        chat_id,
    }));

    while let Some(inbound) = session.recv().await {
        if let Inbound::Text(text) = inbound {
            handle_frame(&state, &session.channel, chat_id, user_id, &text);
        }
    }

    state
        .topics
        .chats
        .unsubscribe(chat_id, session.channel.id());
    session.close();
    debug!(chat_id = %chat_id, user_id = %user_id, "chat participant left");
}

pub fn handle_frame(
    state: &AppState,
    channel: &ChannelHandle,
    chat_id: Uuid,
    sender_id: Uuid,
    text: &str,
) {
    let reply = match ChatFrame::parse(text) {
        Ok(ChatFrame::Heartbeat) => OutboundFrame::heartbeat_ack(),
        Ok(ChatFrame::Message { text }) => {
            let text = text.trim();
            if text.is_empty() || text.chars().count() > MAX_MESSAGE_CHARS {
                OutboundFrame::error(format!(
                    "message must be 1..={MAX_MESSAGE_CHARS} characters"
                ))
            } else {
                state.topics.chats.broadcast(
                    chat_id,
                    &OutboundFrame::ChatMessage(ChatMessage {
                        chat_id,
                        sender_id,
                        text: text.to_string(),
                        sent_at: Utc::now(),
                    }),
                );
                return;
            }
        }
        Err(err) => OutboundFrame::error(err.to_string()),
    };

    if let Err(err) = channel.send_json(&reply) {
        debug!(chat_id = %chat_id, error = %err, "reply dropped");
    }
}
