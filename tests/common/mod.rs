#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use p2p_chat_delivery::blob::BlobStore;
use p2p_chat_delivery::chat::{Handled, MsgListener};
use p2p_chat_delivery::common::{MsgStatus, TransportEvent};
use p2p_chat_delivery::config::NotifyPrefs;
use p2p_chat_delivery::network::{MemoryHub, SessionDirectory};
use p2p_chat_delivery::notify::{Notice, Notification, Notifier};
use p2p_chat_delivery::profiles::{StaticProfiles, UserCache};
use p2p_chat_delivery::storage::{ClientDatabase, MessageStore};
use p2p_chat_delivery::{
    ChatError, ChatRuntime, ChatService, Collaborators, Delivery, ListenerSlot, Message, User,
};

pub fn users() -> Vec<User> {
    [("A", "Alice"), ("B", "Bob"), ("C", "Carol")]
        .into_iter()
        .map(|(id, name)| User {
            id: id.to_string(),
            username: name.to_string(),
            avatar_url: None,
        })
        .collect()
}

#[derive(Default)]
pub struct RecordingListener {
    pub id: String,
    pub received: Mutex<Vec<Message>>,
    pub sent: Mutex<Vec<Message>>,
    pub failed: Mutex<Vec<Message>>,
}

impl RecordingListener {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ..Self::default()
        })
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<Message> {
        self.failed.lock().unwrap().clone()
    }
}

impl MsgListener for RecordingListener {
    fn listener_id(&self) -> &str {
        &self.id
    }

    fn on_message(&self, msg: &Message) {
        self.received.lock().unwrap().push(msg.clone());
    }

    fn on_message_sent(&self, msg: &Message) {
        self.sent.lock().unwrap().push(msg.clone());
    }

    fn on_message_failure(&self, msg: &Message) {
        self.failed.lock().unwrap().push(msg.clone());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<Notification>>,
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn transient(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Blob store that hands out `mem://` urls and can be told to fail downloads.
#[derive(Default)]
pub struct FakeBlobs {
    pub fail_downloads: AtomicBool,
    pub uploads: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload(&self, object_id: &str, _local_path: &Path) -> Result<String, ChatError> {
        self.uploads.lock().unwrap().push(object_id.to_string());
        Ok(format!("mem://{object_id}"))
    }

    async fn download_if_absent(&self, url: &str, _dest: &Path) -> Result<(), ChatError> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(ChatError::SideContentFetch(format!("{url} unreachable")));
        }
        self.downloads.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Store that records, for every insert, how many messages its owner had sent so far.
pub struct JournalStore {
    inner: ClientDatabase,
    hub: MemoryHub,
    identity: String,
    pub inserts: Mutex<Vec<(String, MsgStatus, usize)>>,
}

impl JournalStore {
    pub fn inserts(&self) -> Vec<(String, MsgStatus, usize)> {
        self.inserts.lock().unwrap().clone()
    }
}

impl MessageStore for JournalStore {
    fn insert_message(&self, msg: &Message) -> Result<bool, ChatError> {
        let sent = self.hub.sent_by(&self.identity).len();
        self.inserts
            .lock()
            .unwrap()
            .push((msg.object_id.clone(), msg.status, sent));
        self.inner.insert_message(msg)
    }

    fn update_status(&self, msg: &Message) -> Result<(), ChatError> {
        self.inner.update_status(msg)
    }

    fn update_status_and_timestamp(&self, msg: &Message) -> Result<(), ChatError> {
        self.inner.update_status_and_timestamp(msg)
    }

    fn get_recent_messages(&self) -> Result<Vec<Message>, ChatError> {
        self.inner.get_recent_messages()
    }

    fn get_message(&self, object_id: &str) -> Result<Option<Message>, ChatError> {
        self.inner.get_message(object_id)
    }

    fn get_conversation(
        &self,
        conv_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Message>, ChatError> {
        self.inner.get_conversation(conv_id, limit, offset)
    }
}

/// Result of pumping one event through a [`ChatRuntime`].
#[derive(Debug)]
pub enum Outcome {
    Delivery(Result<Delivery, ChatError>),
    Sent(Option<Message>),
    Failed(Option<Message>),
    Presence,
    Closed,
}

/// One chat participant wired to the in-memory hub.
pub struct Peer {
    pub id: String,
    pub service: Arc<ChatService>,
    pub runtime: ChatRuntime,
    pub events: mpsc::Receiver<TransportEvent>,
    pub store: Arc<JournalStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub blobs: Arc<FakeBlobs>,
}

impl Peer {
    /// Connects `id` to the hub and opens its session.
    pub fn join(hub: &MemoryHub, id: &str) -> Self {
        Self::join_with(hub, id, NotifyPrefs::default())
    }

    pub fn join_with(hub: &MemoryHub, id: &str, prefs: NotifyPrefs) -> Self {
        let events = hub.connect(id);
        let peer = Self::detached(hub, id, prefs, events);
        peer.service.open_session().unwrap();
        peer
    }

    /// A participant the hub has never heard of; every send is refused.
    pub fn unreachable(hub: &MemoryHub, id: &str) -> Self {
        let (_tx, events) = mpsc::channel(1);
        Self::detached(hub, id, NotifyPrefs::default(), events)
    }

    fn detached(
        hub: &MemoryHub,
        id: &str,
        prefs: NotifyPrefs,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let store = Arc::new(JournalStore {
            inner: ClientDatabase::in_memory().unwrap(),
            hub: hub.clone(),
            identity: id.to_string(),
            inserts: Mutex::new(Vec::new()),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let blobs = Arc::new(FakeBlobs::default());
        let parts = Collaborators {
            sessions: Arc::new(SessionDirectory::new(Arc::new(hub.factory()))),
            store: store.clone(),
            users: Arc::new(UserCache::new(StaticProfiles::new(users()))),
            blobs: blobs.clone(),
            notifier: notifier.clone(),
        };
        let service = Arc::new(ChatService::new(id, parts, prefs, "media"));
        let runtime = ChatRuntime::new(service.clone(), Arc::new(ListenerSlot::new()));
        Self {
            id: id.to_string(),
            service,
            runtime,
            events,
            store,
            notifier,
            blobs,
        }
    }

    pub fn listen(&self, listener: Arc<RecordingListener>) {
        self.runtime.listeners().register(listener);
    }

    pub fn status_of(&self, object_id: &str) -> Option<MsgStatus> {
        self.store
            .get_message(object_id)
            .unwrap()
            .map(|msg| msg.status)
    }

    /// Handles every queued event, awaiting inbound work before moving on.
    pub async fn pump(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            let outcome = match self.runtime.handle_event(event) {
                Handled::Inbound(task) => Outcome::Delivery(task.await.unwrap()),
                Handled::Sent(msg) => Outcome::Sent(msg),
                Handled::Failed(msg) => Outcome::Failed(msg),
                Handled::Presence => Outcome::Presence,
                Handled::Closed => Outcome::Closed,
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Inbound message bodies waiting on the channel, without handling them.
    pub fn take_inbound(&mut self) -> Vec<(String, Option<String>)> {
        let mut inbound = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let TransportEvent::Message { payload, group_id } = event {
                inbound.push((payload, group_id));
            }
        }
        inbound
    }
}

pub fn deliveries(outcomes: &[Outcome]) -> Vec<&Delivery> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Outcome::Delivery(Ok(delivery)) => Some(delivery),
            _ => None,
        })
        .collect()
}
