use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use libp2p::gossipsub::{self, TopicHash};
use libp2p::identify;
use libp2p::kad;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity, mdns};
use tokio::sync::mpsc;

use crate::common::{SessionCommand, TransportEvent, WireMessage};
use crate::error::ChatError;

use super::behavior::{ChatBehavior, ChatBehaviorEvent, build_behavior, group_topic, peer_topic};
use super::session::{Group, Session, SessionFactory};
use super::transport::build_transport;
use super::EVENT_CHANNEL_CAPACITY;

const MAX_CONCURRENT_PEER_LOOKUPS: usize = 3;
const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";

#[derive(Debug, Clone)]
pub struct Libp2pConfig {
    pub key_path: PathBuf,
    pub listen_addr: String,
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
}

impl Libp2pConfig {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Builds gossipsub-backed sessions that all report on one event channel.
///
/// The local identity is the string form of the persisted keypair's PeerId.
pub struct Libp2pSessionFactory {
    config: Libp2pConfig,
    local_key: identity::Keypair,
    events: mpsc::Sender<TransportEvent>,
}

impl Libp2pSessionFactory {
    pub fn new(
        config: Libp2pConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, ChatError> {
        let local_key = load_or_generate_local_key(&config.key_path)?;
        Ok(Self {
            config,
            local_key,
            events,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        PeerId::from(self.local_key.public())
    }
}

impl SessionFactory for Libp2pSessionFactory {
    fn create(&self, identity: &str) -> Result<Arc<dyn Session>, ChatError> {
        let local_peer_id = self.local_peer_id().to_string();
        if identity != local_peer_id {
            return Err(ChatError::Transport(format!(
                "identity {identity} does not match local key {local_peer_id}"
            )));
        }
        Ok(Arc::new(Libp2pSession {
            identity: identity.to_string(),
            config: self.config.clone(),
            local_key: self.local_key.clone(),
            events: self.events.clone(),
            commands: Mutex::new(None),
        }))
    }
}

pub struct Libp2pSession {
    identity: String,
    config: Libp2pConfig,
    local_key: identity::Keypair,
    events: mpsc::Sender<TransportEvent>,
    commands: Mutex<Option<mpsc::Sender<SessionCommand>>>,
}

impl Libp2pSession {
    fn command_sender(&self) -> Result<mpsc::Sender<SessionCommand>, ChatError> {
        self.commands
            .lock()
            .map_err(|_| ChatError::Transport("session command lock poisoned".to_string()))?
            .clone()
            .filter(|sender| !sender.is_closed())
            .ok_or_else(|| ChatError::SessionClosed(self.identity.clone()))
    }

    fn command(&self, command: SessionCommand) -> Result<(), ChatError> {
        send_command(&self.command_sender()?, command)
    }
}

fn send_command(
    sender: &mpsc::Sender<SessionCommand>,
    command: SessionCommand,
) -> Result<(), ChatError> {
    sender
        .try_send(command)
        .map_err(|err| ChatError::Transport(format!("network loop unavailable: {err}")))
}

impl Session for Libp2pSession {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn open(&self, watch: &[String]) -> Result<(), ChatError> {
        let mut commands = self
            .commands
            .lock()
            .map_err(|_| ChatError::Transport("session command lock poisoned".to_string()))?;
        if commands.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ChatError::Transport(format!("no tokio runtime: {err}")))?;
        let (command_tx, command_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let swarm_loop = SwarmLoop::new(
            self.identity.clone(),
            self.config.clone(),
            self.events.clone(),
            command_rx,
        );
        let local_key = self.local_key.clone();
        runtime.spawn(async move {
            if let Err(err) = swarm_loop.run(local_key).await {
                log::error!("Network loop terminated: {err}");
            }
        });

        if !watch.is_empty() {
            send_command(
                &command_tx,
                SessionCommand::Watch {
                    peer_ids: watch.to_vec(),
                },
            )?;
        }
        *commands = Some(command_tx);
        Ok(())
    }

    fn close(&self) -> Result<(), ChatError> {
        let sender = self
            .commands
            .lock()
            .map_err(|_| ChatError::Transport("session command lock poisoned".to_string()))?
            .take();
        if let Some(sender) = sender {
            if let Err(err) = sender.try_send(SessionCommand::Shutdown) {
                log::debug!("Network loop already stopped: {err}");
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.command_sender().is_ok()
    }

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError> {
        self.command(SessionCommand::Publish(wire.clone()))
    }

    fn watch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
        self.command(SessionCommand::Watch {
            peer_ids: peer_ids.to_vec(),
        })
    }

    fn unwatch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
        match self.command_sender() {
            Ok(sender) => send_command(
                &sender,
                SessionCommand::Unwatch {
                    peer_ids: peer_ids.to_vec(),
                },
            ),
            // Nothing is watched on a closed session.
            Err(ChatError::SessionClosed(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn group(&self, group_id: &str) -> Result<Arc<dyn Group>, ChatError> {
        let sender = self.command_sender()?;
        send_command(
            &sender,
            SessionCommand::JoinGroup {
                group_id: group_id.to_string(),
            },
        )?;
        Ok(Arc::new(Libp2pGroup {
            group_id: group_id.to_string(),
            commands: sender,
        }))
    }
}

pub struct Libp2pGroup {
    group_id: String,
    commands: mpsc::Sender<SessionCommand>,
}

impl Group for Libp2pGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn send_message(&self, wire: &WireMessage) -> Result<(), ChatError> {
        let mut wire = wire.clone();
        wire.group_id = Some(self.group_id.clone());
        send_command(&self.commands, SessionCommand::Publish(wire))
    }
}

/// Owns the swarm of one open session and bridges it to the chat core.
struct SwarmLoop {
    identity: String,
    config: Libp2pConfig,
    events: mpsc::Sender<TransportEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    group_topics: HashMap<TopicHash, String>,
    watched: HashSet<String>,
    pending_lookups: HashMap<kad::QueryId, String>,
    lookup_queue: VecDeque<String>,
}

impl SwarmLoop {
    fn new(
        identity: String,
        config: Libp2pConfig,
        events: mpsc::Sender<TransportEvent>,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            identity,
            config,
            events,
            commands,
            group_topics: HashMap::new(),
            watched: HashSet::new(),
            pending_lookups: HashMap::new(),
            lookup_queue: VecDeque::new(),
        }
    }

    async fn run(mut self, local_key: identity::Keypair) -> Result<(), ChatError> {
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id:?}");

        let transport = build_transport(&local_key)?;
        let behavior = build_behavior(&local_key, local_peer_id)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor(),
        );

        let listen_addr: Multiaddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|err| ChatError::Transport(format!("bad listen address: {err}")))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|err| ChatError::Transport(err.to_string()))?;
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&peer_topic(&self.identity))
            .map_err(|err| ChatError::Transport(format!("subscribe inbox: {err}")))?;

        self.dial_bootstrap_peers(&mut swarm);
        log::info!("Network event loop started for {}", self.identity);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command, &mut swarm).await,
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm).await;
                }
            }
        }

        self.emit(TransportEvent::Closed).await;
        log::info!("Network event loop stopped for {}", self.identity);
        Ok(())
    }

    fn dial_bootstrap_peers(&self, swarm: &mut Swarm<ChatBehavior>) {
        if self.config.bootstrap_peers.is_empty() {
            log::warn!("No bootstrap peers configured; relying on mDNS discovery");
            return;
        }
        for (peer_id, addr) in &self.config.bootstrap_peers {
            log::info!("Adding bootstrap peer {peer_id} at {addr}");
            swarm.behaviour_mut().kad.add_address(peer_id, addr.clone());
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial bootstrap peer {peer_id}: {err}");
            }
        }
        if let Err(err) = swarm.behaviour_mut().kad.bootstrap() {
            log::warn!("Failed to trigger Kademlia bootstrap: {err}");
        }
    }

    async fn handle_command(&mut self, command: SessionCommand, swarm: &mut Swarm<ChatBehavior>) {
        match command {
            SessionCommand::Publish(wire) => self.publish(wire, swarm).await,
            SessionCommand::JoinGroup { group_id } => {
                let topic = group_topic(&group_id);
                match swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    Ok(_) => {
                        self.group_topics.insert(topic.hash(), group_id);
                    }
                    Err(err) => log::warn!("Failed to join group {group_id}: {err:?}"),
                }
            }
            SessionCommand::Watch { peer_ids } => {
                for peer_id in peer_ids {
                    if self.watched.insert(peer_id.clone()) {
                        self.enqueue_lookup(&peer_id);
                    }
                }
                self.try_start_next_lookups(swarm);
            }
            SessionCommand::Unwatch { peer_ids } => {
                for peer_id in &peer_ids {
                    self.watched.remove(peer_id);
                }
                self.lookup_queue.retain(|queued| !peer_ids.contains(queued));
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn publish(&mut self, wire: WireMessage, swarm: &mut Swarm<ChatBehavior>) {
        let topics = match &wire.group_id {
            Some(group_id) => vec![group_topic(group_id)],
            None => wire.to_peer_ids.iter().map(|id| peer_topic(id)).collect(),
        };

        let mut failed = topics.is_empty();
        for topic in topics {
            if let Err(err) = swarm
                .behaviour_mut()
                .gossipsub
                .publish(topic.clone(), wire.payload.as_bytes())
            {
                log::warn!("Publish error on {topic}: {err:?}");
                failed = true;
            }
        }

        let outcome = if failed {
            TransportEvent::SendError {
                error: wire.payload,
            }
        } else {
            TransportEvent::SendAck {
                payload: wire.payload,
            }
        };
        self.emit(outcome).await;
    }

    async fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<ChatBehaviorEvent>,
        swarm: &mut Swarm<ChatBehavior>,
    ) {
        match event {
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => match String::from_utf8(message.data) {
                Ok(payload) => {
                    let group_id = self.group_topics.get(&message.topic).cloned();
                    self.emit(TransportEvent::Message { payload, group_id }).await;
                }
                Err(err) => log::warn!("Dropping non UTF-8 payload: {err}"),
            },
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, addr) in list {
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    swarm.behaviour_mut().kad.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in info.listen_addrs {
                    swarm.behaviour_mut().kad.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Kad(event)) => {
                self.handle_kad_event(event, swarm).await;
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                self.report_presence(&peer_id.to_string(), true).await;
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                self.report_presence(&peer_id.to_string(), false).await;
            }
            _ => {}
        }
    }

    async fn handle_kad_event(&mut self, event: kad::Event, swarm: &mut Swarm<ChatBehavior>) {
        if let kad::Event::OutboundQueryProgressed { id, result, .. } = event {
            match result {
                kad::QueryResult::Bootstrap(Ok(kad::BootstrapOk { num_remaining, .. })) => {
                    log::info!("Kademlia bootstrap ok, remaining peers: {num_remaining}");
                }
                kad::QueryResult::Bootstrap(Err(err)) => {
                    log::warn!("Kademlia bootstrap error: {err:?}");
                }
                kad::QueryResult::GetClosestPeers(res) => {
                    if let Some(peer_id) = self.pending_lookups.remove(&id) {
                        let found = match res {
                            Ok(kad::GetClosestPeersOk { peers, .. }) => {
                                PeerId::from_str(&peer_id).is_ok_and(|target| {
                                    peers.iter().any(|peer| peer.peer_id == target)
                                })
                            }
                            Err(kad::GetClosestPeersError::Timeout { .. }) => false,
                        };
                        self.report_presence(&peer_id, found).await;
                        self.try_start_next_lookups(swarm);
                    }
                }
                _ => {}
            }
        }
    }

    async fn report_presence(&self, peer_id: &str, online: bool) {
        if self.watched.contains(peer_id) {
            self.emit(TransportEvent::Presence {
                peer_id: peer_id.to_string(),
                online,
            })
            .await;
        }
    }

    fn enqueue_lookup(&mut self, peer_id: &str) {
        if self.pending_lookups.values().any(|running| running == peer_id)
            || self.lookup_queue.iter().any(|queued| queued == peer_id)
        {
            return;
        }
        self.lookup_queue.push_back(peer_id.to_string());
    }

    fn try_start_next_lookups(&mut self, swarm: &mut Swarm<ChatBehavior>) {
        while self.pending_lookups.len() < MAX_CONCURRENT_PEER_LOOKUPS {
            let Some(peer_id) = self.lookup_queue.pop_front() else {
                break;
            };
            match PeerId::from_str(&peer_id) {
                Ok(target) => {
                    let query_id = swarm.behaviour_mut().kad.get_closest_peers(target);
                    self.pending_lookups.insert(query_id, peer_id);
                }
                Err(err) => log::warn!("Cannot watch {peer_id}: {err}"),
            }
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if let Err(err) = self.events.send(event).await {
            log::warn!("Failed to forward transport event: {err}");
        }
    }
}

fn load_or_generate_local_key(path: &Path) -> Result<identity::Keypair, ChatError> {
    if path.exists() {
        let bytes = fs::read(path)?;
        let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| ChatError::Decode(format!("client identity key: {e}")))?;
        log::info!("Loaded persisted identity key from {}", path.display());
        Ok(keypair)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let keypair = identity::Keypair::generate_ed25519();
        let encoded = keypair
            .to_protobuf_encoding()
            .map_err(|e| ChatError::Decode(format!("client identity key: {e}")))?;
        fs::write(path, encoded)?;
        log::info!("Generated new identity key and saved to {}", path.display());
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/client_key.pk");

        let first = load_or_generate_local_key(&path).unwrap();
        let second = load_or_generate_local_key(&path).unwrap();

        assert_eq!(
            PeerId::from(first.public()),
            PeerId::from(second.public())
        );
    }

    #[test]
    fn factory_rejects_foreign_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (events, _rx) = mpsc::channel(1);
        let factory =
            Libp2pSessionFactory::new(Libp2pConfig::new(dir.path().join("k.pk")), events).unwrap();

        assert!(factory.create("someone-else").is_err());
        let own = factory.local_peer_id().to_string();
        let session = factory.create(&own).unwrap();
        assert!(!session.is_open());
        assert!(matches!(
            session.send_message(&WireMessage {
                to_peer_ids: vec!["x".into()],
                group_id: None,
                payload: "{}".into(),
            }),
            Err(ChatError::SessionClosed(_))
        ));
        session.unwatch_peers(&["x".to_string()]).unwrap();
    }
}
