use std::sync::Arc;

use crate::common::{Message, MsgStatus};
use crate::error::ChatError;
use crate::storage::MessageStore;

use super::response::acked_timestamp;

/// Maps transport outcomes onto stored message status.
///
/// Every update is keyed by `object_id` and overwrites, so replays are harmless.
pub struct StatusReconciler {
    self_id: String,
    store: Arc<dyn MessageStore>,
}

impl StatusReconciler {
    pub fn new(self_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            self_id: self_id.into(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Stores an outbound message in `SendStart`. A resend of a known id resets its row.
    pub fn mark_pending(&self, msg: &Message) -> Result<(), ChatError> {
        let mut pending = msg.clone();
        pending.status = MsgStatus::SendStart;
        if !self.store.insert_message(&pending)? {
            log::debug!("Resending {}", pending.object_id);
            self.store.update_status_and_timestamp(&pending)?;
        }
        Ok(())
    }

    /// The transport refused the message outright.
    pub fn mark_failed(&self, msg: &mut Message) -> Result<(), ChatError> {
        msg.status = MsgStatus::SendFailed;
        self.store.update_status(msg)
    }

    /// Transport confirmed hand-off of `payload`. Acks of our own acks are ignored.
    pub fn on_send_ack(&self, payload: &str) -> Result<Option<Message>, ChatError> {
        let mut msg = Message::from_payload(payload)?;
        if msg.is_response() {
            return Ok(None);
        }
        msg.status = MsgStatus::SendSucceeded;
        self.store.update_status_and_timestamp(&msg)?;
        log::debug!("Message {} handed off", msg.object_id);
        self.stored_or(msg)
    }

    /// Transport reported a failure. Only a JSON message body can be attributed
    /// to a stored row; anything else is logged and dropped.
    pub fn on_send_failure(&self, error: &str) -> Result<Option<Message>, ChatError> {
        if !error.starts_with('{') {
            log::warn!("Unattributable send failure: {error}");
            return Ok(None);
        }
        let mut msg = match Message::from_payload(error) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("Send failure body is not a message ({err}): {error}");
                return Ok(None);
            }
        };
        if msg.is_response() {
            log::debug!("Ack {} could not be delivered", msg.object_id);
            return Ok(None);
        }
        msg.status = MsgStatus::SendFailed;
        self.store.update_status(&msg)?;
        log::info!("Message {} failed to send", msg.object_id);
        self.stored_or(msg)
    }

    /// Stores an inbound message as `Received`. `false` means it was already stored.
    pub fn on_receive(&self, msg: &mut Message) -> Result<bool, ChatError> {
        msg.status = MsgStatus::Received;
        self.store.insert_message(msg)
    }

    /// The recipient acknowledged one of our messages. Returns the updated row.
    ///
    /// Only rows we authored are touched; acks naming anything else are dropped.
    pub fn on_response(&self, ack: &Message) -> Result<Option<Message>, ChatError> {
        let timestamp = acked_timestamp(ack)?;
        let Some(mut row) = self.store.get_message(&ack.object_id)? else {
            log::debug!("Ack for unknown message {}", ack.object_id);
            return Ok(None);
        };
        if row.from_peer_id != self.self_id {
            log::warn!(
                "{} acked {} which {} sent, not us",
                ack.from_peer_id,
                row.object_id,
                row.from_peer_id
            );
            return Ok(None);
        }
        row.status = MsgStatus::SendSucceeded;
        row.timestamp = timestamp;
        self.store.update_status_and_timestamp(&row)?;
        Ok(Some(row))
    }

    fn stored_or(&self, msg: Message) -> Result<Option<Message>, ChatError> {
        Ok(Some(self.store.get_message(&msg.object_id)?.unwrap_or(msg)))
    }
}
