use std::sync::Arc;

use crate::common::WireMessage;
use crate::error::ChatError;

/// Per-identity transport handle.
///
/// Implementations deliver inbound traffic and send outcomes as
/// [`TransportEvent`](crate::common::TransportEvent)s on the channel they were
/// built with; `send_message` only reports failures it can see synchronously.
pub trait Session: Send + Sync {
    fn identity(&self) -> &str;

    fn open(&self, watch: &[String]) -> Result<(), ChatError>;

    fn close(&self) -> Result<(), ChatError>;

    fn is_open(&self) -> bool;

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError>;

    fn watch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError>;

    /// Must be a no-op for peers that are not watched.
    fn unwatch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError>;

    fn group(&self, group_id: &str) -> Result<Arc<dyn Group>, ChatError>;
}

pub trait Group: Send + Sync {
    fn group_id(&self) -> &str;

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError>;
}

pub trait SessionFactory: Send + Sync {
    fn create(&self, identity: &str) -> Result<Arc<dyn Session>, ChatError>;
}
