use std::sync::{Arc, RwLock};

use crate::common::Message;

/// Observer of one open conversation (a peer id or a group id).
pub trait MsgListener: Send + Sync {
    fn listener_id(&self) -> &str;

    fn on_message(&self, msg: &Message);

    fn on_message_sent(&self, msg: &Message);

    fn on_message_failure(&self, msg: &Message);
}

/// Returns the listener only if it observes the message's conversation.
///
/// In a group the listener id must be the group id; otherwise it must be the
/// chat partner as seen from `self_id`.
pub fn filter_listener<'a>(
    listener: Option<&'a Arc<dyn MsgListener>>,
    msg: &Message,
    group_id: Option<&str>,
    self_id: &str,
) -> Option<&'a Arc<dyn MsgListener>> {
    let listener = listener?;
    let conversation = match group_id {
        Some(group_id) => group_id,
        None => msg.chat_user_id(self_id),
    };
    (listener.listener_id() == conversation).then_some(listener)
}

/// Holds the listener of the conversation currently on screen.
#[derive(Default)]
pub struct ListenerSlot {
    current: RwLock<Option<Arc<dyn MsgListener>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was registered before.
    pub fn register(&self, listener: Arc<dyn MsgListener>) {
        log::debug!("Listening on conversation {}", listener.listener_id());
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(listener);
    }

    /// Clears the slot only if `listener_id` is still the registered one.
    pub fn unregister(&self, listener_id: &str) {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        if current
            .as_ref()
            .is_some_and(|listener| listener.listener_id() == listener_id)
        {
            *current = None;
        }
    }

    pub fn current(&self) -> Option<Arc<dyn MsgListener>> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
