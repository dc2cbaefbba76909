use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::common::{TransportEvent, WireMessage};
use crate::error::ChatError;

use super::EVENT_CHANNEL_CAPACITY;
use super::session::{Group, Session, SessionFactory};

/// Sends remembered for [`MemoryHub::sent_by`]; older ones are forgotten.
pub const SENT_LOG_CAPACITY: usize = 256;

/// In-process transport connecting sessions by identity.
///
/// Mirrors the libp2p session's observable behaviour: a send that reaches every
/// recipient is acked with `SendAck`, one that reaches nobody fails with a
/// `SendError` carrying the message body. Injected failures produce a bare,
/// unattributable error string instead.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, Endpoint>,
    groups: HashMap<String, BTreeSet<String>>,
    failures: VecDeque<String>,
    sent: VecDeque<(String, WireMessage)>,
}

struct Endpoint {
    events: mpsc::Sender<TransportEvent>,
    open: bool,
    watched: BTreeSet<String>,
}

impl Endpoint {
    fn emit(&self, identity: &str, event: TransportEvent) {
        if let Err(err) = self.events.try_send(event) {
            log::warn!("Dropping event for {identity}: {err}");
        }
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `identity` and returns the receiving end of its event stream.
    pub fn connect(&self, identity: &str) -> mpsc::Receiver<TransportEvent> {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.lock().endpoints.insert(
            identity.to_string(),
            Endpoint {
                events,
                open: false,
                watched: BTreeSet::new(),
            },
        );
        receiver
    }

    pub fn factory(&self) -> MemorySessionFactory {
        MemorySessionFactory { hub: self.clone() }
    }

    pub fn join_group(&self, group_id: &str, identity: &str) {
        self.lock()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .insert(identity.to_string());
    }

    /// The next send from any session fails with `error` verbatim.
    pub fn inject_failure(&self, error: impl Into<String>) {
        self.lock().failures.push_back(error.into());
    }

    /// The most recent sends of `identity`, oldest first.
    pub fn sent_by(&self, identity: &str) -> Vec<WireMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|(from, _)| from == identity)
            .map(|(_, wire)| wire.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_open(&self, identity: &str, open: bool) -> Result<(), ChatError> {
        let mut state = self.lock();
        let endpoint = state
            .endpoints
            .get_mut(identity)
            .ok_or_else(|| ChatError::Transport(format!("{identity} is not connected to the hub")))?;
        endpoint.open = open;
        if !open {
            endpoint.emit(identity, TransportEvent::Closed);
        }
        for (watcher, endpoint) in &state.endpoints {
            if watcher != identity && endpoint.open && endpoint.watched.contains(identity) {
                endpoint.emit(
                    watcher,
                    TransportEvent::Presence {
                        peer_id: identity.to_string(),
                        online: open,
                    },
                );
            }
        }
        Ok(())
    }

    fn is_open(&self, identity: &str) -> bool {
        self.lock()
            .endpoints
            .get(identity)
            .is_some_and(|endpoint| endpoint.open)
    }

    fn set_watch(&self, identity: &str, peer_ids: &[String], watch: bool) -> Result<(), ChatError> {
        let mut state = self.lock();
        let online: Vec<(String, bool)> = peer_ids
            .iter()
            .map(|peer| {
                let up = state.endpoints.get(peer).is_some_and(|e| e.open);
                (peer.clone(), up)
            })
            .collect();
        let endpoint = state
            .endpoints
            .get_mut(identity)
            .ok_or_else(|| ChatError::SessionClosed(identity.to_string()))?;
        for (peer_id, up) in online {
            if watch {
                if endpoint.watched.insert(peer_id.clone()) {
                    endpoint.emit(identity, TransportEvent::Presence { peer_id, online: up });
                }
            } else {
                endpoint.watched.remove(&peer_id);
            }
        }
        Ok(())
    }

    fn deliver(&self, from: &str, wire: &WireMessage) -> Result<(), ChatError> {
        let mut state = self.lock();
        let sender_open = state.endpoints.get(from).is_some_and(|e| e.open);
        if !sender_open {
            return Err(ChatError::SessionClosed(from.to_string()));
        }
        if state.sent.len() == SENT_LOG_CAPACITY {
            state.sent.pop_front();
        }
        state.sent.push_back((from.to_string(), wire.clone()));

        if let Some(error) = state.failures.pop_front() {
            if let Some(sender) = state.endpoints.get(from) {
                sender.emit(from, TransportEvent::SendError { error });
            }
            return Ok(());
        }

        let recipients: Vec<String> = match &wire.group_id {
            Some(group_id) => state
                .groups
                .get(group_id)
                .map(|members| members.iter().filter(|m| *m != from).cloned().collect())
                .unwrap_or_default(),
            None => wire.to_peer_ids.clone(),
        };

        let mut delivered = 0;
        for recipient in &recipients {
            match state.endpoints.get(recipient) {
                Some(endpoint) if endpoint.open => {
                    endpoint.emit(
                        recipient,
                        TransportEvent::Message {
                            payload: wire.payload.clone(),
                            group_id: wire.group_id.clone(),
                        },
                    );
                    delivered += 1;
                }
                _ => log::debug!("{recipient} is offline; not delivering from {from}"),
            }
        }

        let outcome = if delivered > 0 && (wire.group_id.is_some() || delivered == recipients.len())
        {
            TransportEvent::SendAck {
                payload: wire.payload.clone(),
            }
        } else {
            TransportEvent::SendError {
                error: wire.payload.clone(),
            }
        };
        if let Some(sender) = state.endpoints.get(from) {
            sender.emit(from, outcome);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemorySessionFactory {
    hub: MemoryHub,
}

impl SessionFactory for MemorySessionFactory {
    fn create(&self, identity: &str) -> Result<Arc<dyn Session>, ChatError> {
        Ok(Arc::new(MemorySession {
            hub: self.hub.clone(),
            identity: identity.to_string(),
        }))
    }
}

pub struct MemorySession {
    hub: MemoryHub,
    identity: String,
}

impl Session for MemorySession {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn open(&self, watch: &[String]) -> Result<(), ChatError> {
        self.hub.set_open(&self.identity, true)?;
        self.hub.set_watch(&self.identity, watch, true)
    }

    fn close(&self) -> Result<(), ChatError> {
        self.hub.set_open(&self.identity, false)
    }

    fn is_open(&self) -> bool {
        self.hub.is_open(&self.identity)
    }

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError> {
        self.hub.deliver(&self.identity, wire)
    }

    fn watch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
        self.hub.set_watch(&self.identity, peer_ids, true)
    }

    fn unwatch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
        self.hub.set_watch(&self.identity, peer_ids, false)
    }

    fn group(&self, group_id: &str) -> Result<Arc<dyn Group>, ChatError> {
        self.hub.join_group(group_id, &self.identity);
        Ok(Arc::new(MemoryGroup {
            hub: self.hub.clone(),
            group_id: group_id.to_string(),
            identity: self.identity.clone(),
        }))
    }
}

pub struct MemoryGroup {
    hub: MemoryHub,
    group_id: String,
    identity: String,
}

impl Group for MemoryGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError> {
        let mut wire = wire.clone();
        wire.group_id = Some(self.group_id.clone());
        self.hub.deliver(&self.identity, &wire)
    }
}
