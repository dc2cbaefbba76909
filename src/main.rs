use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::mpsc;

use p2p_chat_delivery::blob::HttpBlobStore;
use p2p_chat_delivery::chat::Handled;
use p2p_chat_delivery::common::TransportEvent;
use p2p_chat_delivery::config::{self, AppConfig};
use p2p_chat_delivery::network::{
    EVENT_CHANNEL_CAPACITY, Libp2pConfig, Libp2pSessionFactory, SessionDirectory,
};
use p2p_chat_delivery::notify::LogNotifier;
use p2p_chat_delivery::profiles::{StaticProfiles, UserCache};
use p2p_chat_delivery::storage::{ClientDatabase, ensure_data_dir};
use p2p_chat_delivery::{
    ChatError, ChatRuntime, ChatService, Collaborators, ListenerSlot, Message, MsgListener,
    Recipient,
};

#[derive(Parser)]
#[command(name = "p2p-chat", version, about = "Serverless P2P chat client")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the session and log inbound traffic
    Listen {
        /// Peer or group whose messages go to the console instead of notifications
        #[arg(long)]
        with: Option<String>,
        /// Groups to join
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// Send one text message and wait for the transport outcome
    Send {
        #[arg(long)]
        to: String,
        /// Treat `--to` as a group id
        #[arg(long)]
        group: bool,
        /// Seconds to wait for peers before sending
        #[arg(long, default_value_t = 3)]
        settle: u64,
        text: String,
    },
    /// Print the latest message of every conversation
    Recent,
    /// Remember a bootstrap node (`/ip4/.../tcp/.../p2p/<PeerId>`)
    AddBootstrap { address: String },
}

/// Prints the open conversation to stdout.
struct ConsoleListener {
    conversation: String,
}

impl MsgListener for ConsoleListener {
    fn listener_id(&self) -> &str {
        &self.conversation
    }

    fn on_message(&self, msg: &Message) {
        println!("[{}] {}: {}", self.conversation, msg.from_peer_id, msg.notify_content());
    }

    fn on_message_sent(&self, msg: &Message) {
        println!("[{}] sent {}", self.conversation, msg.object_id);
    }

    fn on_message_failure(&self, msg: &Message) {
        println!("[{}] failed {}", self.conversation, msg.object_id);
    }
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env_overrides();

    match cli.command {
        Command::AddBootstrap { address } => {
            if parse_bootstrap_peers(std::slice::from_ref(&address)).is_empty() {
                return Err(ChatError::InvalidMessage(format!(
                    "`{address}` is not a bootstrap multiaddr"
                )));
            }
            config::persist_bootstrap_node(&cli.config, &address);
            Ok(())
        }
        Command::Recent => {
            let (service, _events) = build_service(&app_config)?;
            for recent in service.recent_messages_and_cache()? {
                let partner = recent
                    .to_user
                    .map(|user| user.username)
                    .unwrap_or_else(|| recent.msg.chat_user_id(service.self_id()).to_string());
                println!(
                    "{partner}\t{:?}\t{}",
                    recent.msg.status,
                    recent.msg.notify_content()
                );
            }
            Ok(())
        }
        Command::Listen { with, groups } => {
            let (service, events) = build_service(&app_config)?;
            service.open_session()?;
            for group_id in &groups {
                service.group_by_id(group_id)?;
            }
            log::info!("Listening as {}", service.self_id());

            let listeners = Arc::new(ListenerSlot::new());
            if let Some(conversation) = with {
                listeners.register(Arc::new(ConsoleListener { conversation }));
            }
            ChatRuntime::new(service, listeners).run(events).await;
            Ok(())
        }
        Command::Send {
            to,
            group,
            settle,
            text,
        } => {
            let (service, events) = build_service(&app_config)?;
            service.open_session()?;
            let recipient = if group {
                service.group_by_id(&to)?;
                Recipient::Group(to)
            } else {
                Recipient::Peer(to)
            };
            tokio::time::sleep(Duration::from_secs(settle)).await;

            let msg = service.send_text(recipient, &text)?;
            let runtime = ChatRuntime::new(service.clone(), Arc::new(ListenerSlot::new()));
            let status = wait_for_outcome(&runtime, events, &msg.object_id).await;
            println!("{} {status}", msg.object_id);
            service.close_session()
        }
    }
}

fn build_service(
    app_config: &AppConfig,
) -> Result<(Arc<ChatService>, mpsc::Receiver<TransportEvent>), ChatError> {
    ensure_data_dir(&app_config.data_dir)?;
    ensure_data_dir(&app_config.media_dir())?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut libp2p_config = Libp2pConfig::new(app_config.key_path());
    libp2p_config.bootstrap_peers = parse_bootstrap_peers(&app_config.bootstrap_nodes);
    log::info!(
        "Client started with {} bootstrap peers",
        libp2p_config.bootstrap_peers.len()
    );

    let factory = Libp2pSessionFactory::new(libp2p_config, event_tx)?;
    let self_id = factory.local_peer_id().to_string();

    let parts = Collaborators {
        sessions: Arc::new(SessionDirectory::new(Arc::new(factory))),
        store: Arc::new(ClientDatabase::with_path(app_config.db_path())?),
        users: Arc::new(UserCache::new(StaticProfiles::new(app_config.users.clone()))),
        blobs: Arc::new(HttpBlobStore::new(app_config.blob_base_url.clone())),
        notifier: Arc::new(LogNotifier),
    };
    let service = ChatService::from_config(self_id, parts, app_config);
    Ok((Arc::new(service), event_rx))
}

async fn wait_for_outcome(
    runtime: &ChatRuntime,
    mut events: mpsc::Receiver<TransportEvent>,
    object_id: &str,
) -> &'static str {
    let wait = async {
        while let Some(event) = events.recv().await {
            match runtime.handle_event(event) {
                Handled::Sent(Some(msg)) if msg.object_id == object_id => return "sent",
                Handled::Failed(Some(msg)) if msg.object_id == object_id => return "failed",
                Handled::Closed => break,
                _ => {}
            }
        }
        "unknown"
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or("pending")
}

fn parse_bootstrap_peers(entries: &[String]) -> Vec<(PeerId, Multiaddr)> {
    entries
        .iter()
        .filter_map(|entry| {
            let mut addr: Multiaddr = match entry.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("Invalid multiaddr `{entry}`: {err}");
                    return None;
                }
            };

            let peer_id = match addr.pop() {
                Some(Protocol::P2p(peer)) => peer,
                _ => {
                    log::warn!("Multiaddr `{entry}` missing /p2p/PeerId suffix");
                    return None;
                }
            };

            Some((peer_id, addr))
        })
        .collect()
}
