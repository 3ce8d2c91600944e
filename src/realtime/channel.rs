use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} is closed")]
    Closed(Uuid),

    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound half of one live connection.
///
/// Frames are queued as JSON text; a writer task owns the socket and drains the
/// queue. Once that task stops, the handle reports itself closed.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.tx
            .send(text)
            .map_err(|_| ChannelError::Closed(self.id))
    }

    pub fn send_json<T: Serialize>(&self, frame: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame)?;
        self.send_text(text)
    }
}
