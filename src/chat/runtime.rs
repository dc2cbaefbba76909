use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Message, TransportEvent};
use crate::error::ChatError;

use super::{ChatService, Delivery, ListenerSlot};

/// What the runtime did with one transport event.
pub enum Handled {
    Inbound(JoinHandle<Result<Delivery, ChatError>>),
    Sent(Option<Message>),
    Failed(Option<Message>),
    Presence,
    Closed,
}

/// Pumps transport events into the chat service.
pub struct ChatRuntime {
    service: Arc<ChatService>,
    listeners: Arc<ListenerSlot>,
}

impl ChatRuntime {
    pub fn new(service: Arc<ChatService>, listeners: Arc<ListenerSlot>) -> Self {
        Self { service, listeners }
    }

    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    pub fn listeners(&self) -> &Arc<ListenerSlot> {
        &self.listeners
    }

    /// Runs until the transport closes or the channel ends.
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if let Handled::Closed = self.handle_event(event) {
                break;
            }
        }
        log::info!("Chat runtime for {} stopped", self.service.self_id());
    }

    pub fn handle_event(&self, event: TransportEvent) -> Handled {
        let listener = self.listeners.current();
        match event {
            TransportEvent::Message { payload, group_id } => {
                Handled::Inbound(self.service.spawn_message(payload, listener, group_id))
            }
            TransportEvent::SendAck { payload } => {
                match self.service.on_message_sent(&payload, listener.as_ref()) {
                    Ok(msg) => Handled::Sent(msg),
                    Err(err) => {
                        log::warn!("Could not apply send ack: {err}");
                        Handled::Sent(None)
                    }
                }
            }
            TransportEvent::SendError { error } => {
                match self.service.on_message_error(&error, listener.as_ref()) {
                    Ok(msg) => Handled::Failed(msg),
                    Err(err) => {
                        log::warn!("Could not apply send failure: {err}");
                        Handled::Failed(None)
                    }
                }
            }
            TransportEvent::Presence { peer_id, online } => {
                log::info!(
                    "Peer {peer_id} is {}",
                    if online { "online" } else { "offline" }
                );
                Handled::Presence
            }
            TransportEvent::Closed => {
                log::info!("Transport closed");
                Handled::Closed
            }
        }
    }
}
