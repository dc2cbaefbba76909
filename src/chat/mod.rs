pub mod dispatcher;
pub mod listener;
pub mod reconciler;
pub mod response;
pub mod runtime;

pub use dispatcher::Dispatcher;
pub use listener::{ListenerSlot, MsgListener, filter_listener};
pub use reconciler::StatusReconciler;
pub use runtime::{ChatRuntime, Handled};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::blob::BlobStore;
use crate::common::{
    FileContent, LocationContent, Message, MsgType, RecentMsg, Recipient, User, check_object_id,
};
use crate::config::{AppConfig, NotifyPrefs};
use crate::error::ChatError;
use crate::network::{Group, SessionDirectory};
use crate::notify::{Conversation, Notice, Notification, Notifier};
use crate::profiles::UserDirectory;
use crate::storage::MessageStore;

/// External collaborators the chat service is wired with.
pub struct Collaborators {
    pub sessions: Arc<SessionDirectory>,
    pub store: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserDirectory>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The open conversation's listener got it.
    Callback(Message),
    /// Nobody was looking; a notification was raised.
    Notified(Message),
    /// Stored without callback or notification.
    Silent(Message),
    /// Already stored; acked again and otherwise ignored.
    Duplicate(Message),
    /// An ack for one of our messages. Carries the updated row when known.
    Reconciled(Option<Message>),
    /// A group ack addressed to another member.
    Ignored(Message),
}

/// Message delivery core for one local identity.
pub struct ChatService {
    self_id: String,
    dispatcher: Dispatcher,
    reconciler: StatusReconciler,
    sessions: Arc<SessionDirectory>,
    users: Arc<dyn UserDirectory>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    prefs: NotifyPrefs,
    media_dir: PathBuf,
}

impl ChatService {
    pub fn new(
        self_id: impl Into<String>,
        parts: Collaborators,
        prefs: NotifyPrefs,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        let self_id = self_id.into();
        Self {
            dispatcher: Dispatcher::new(self_id.clone(), parts.sessions.clone()),
            reconciler: StatusReconciler::new(self_id.clone(), parts.store),
            sessions: parts.sessions,
            users: parts.users,
            blobs: parts.blobs,
            notifier: parts.notifier,
            prefs,
            media_dir: media_dir.into(),
            self_id,
        }
    }

    pub fn from_config(self_id: impl Into<String>, parts: Collaborators, config: &AppConfig) -> Self {
        Self::new(self_id, parts, config.notify.clone(), config.media_dir())
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        self.reconciler.store()
    }

    /// Local file for the side content of `object_id`.
    pub fn media_path(&self, object_id: &str) -> Result<PathBuf, ChatError> {
        check_object_id(object_id)?;
        Ok(self.media_dir.join(object_id))
    }

    // ---- session lifecycle ----

    pub fn open_session(&self) -> Result<(), ChatError> {
        self.sessions.session_for(&self.self_id).map(|_| ())
    }

    pub fn close_session(&self) -> Result<(), ChatError> {
        self.sessions.close(&self.self_id)
    }

    pub fn with_users_to_watch(&self, peer_ids: &[String], watch: bool) -> Result<(), ChatError> {
        self.sessions.watch(&self.self_id, peer_ids, watch)
    }

    pub fn group_by_id(&self, group_id: &str) -> Result<Arc<dyn Group>, ChatError> {
        self.sessions.group(&self.self_id, group_id)
    }

    // ---- outbound ----

    /// Persists the message as `SendStart`, then hands it to the transport.
    ///
    /// The final status arrives later through [`Self::on_message_sent`] or
    /// [`Self::on_message_error`]. A synchronous transport failure marks the
    /// row `SendFailed` right away.
    pub fn send_message(
        &self,
        to: Recipient,
        msg_type: MsgType,
        content: impl Into<String>,
        object_id: Option<String>,
    ) -> Result<Message, ChatError> {
        let mut msg = Message::build(msg_type, content, &self.self_id, to, object_id, None);
        self.reconciler.mark_pending(&msg)?;

        if let Err(err) = self.dispatcher.send(&msg) {
            log::warn!("Sending {} failed: {err}", msg.object_id);
            self.reconciler.mark_failed(&mut msg)?;
            if err.is_network() {
                self.notifier.transient(Notice::BadNetwork);
            }
            return Err(err);
        }
        log::info!(
            "Sent {:?} {} to {}",
            msg.msg_type,
            msg.object_id,
            msg.conversation_id()
        );
        Ok(msg)
    }

    pub fn send_text(&self, to: Recipient, text: &str) -> Result<Message, ChatError> {
        self.send_message(to, MsgType::Text, text, None)
    }

    pub fn send_location(
        &self,
        to: Recipient,
        address: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Message, ChatError> {
        let content = LocationContent {
            address: address.to_string(),
            latitude,
            longitude,
        };
        self.send_message(to, MsgType::Location, content.encode(), None)
    }

    pub async fn send_image(
        &self,
        to: Recipient,
        path: &Path,
        object_id: Option<String>,
    ) -> Result<Message, ChatError> {
        self.send_file(to, MsgType::Image, path, object_id).await
    }

    pub async fn send_audio(
        &self,
        to: Recipient,
        path: &Path,
        object_id: Option<String>,
    ) -> Result<Message, ChatError> {
        self.send_file(to, MsgType::Audio, path, object_id).await
    }

    /// Uploads the file under the message id, then sends `path&url`.
    async fn send_file(
        &self,
        to: Recipient,
        msg_type: MsgType,
        path: &Path,
        object_id: Option<String>,
    ) -> Result<Message, ChatError> {
        let object_id = object_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        check_object_id(&object_id)?;
        let url = match self.blobs.upload(&object_id, path).await {
            Ok(url) => url,
            Err(err) => {
                log::warn!("Upload of {} failed: {err}", path.display());
                self.notifier.transient(Notice::BadNetwork);
                return Err(err);
            }
        };
        let content = FileContent::new(path.display().to_string(), url).encode();
        self.send_message(to, msg_type, content, Some(object_id))
    }

    // ---- inbound ----

    /// Handles one inbound transport body.
    ///
    /// Acks reconcile our own rows. Anything else is acked to its author over
    /// the route it arrived on, its side content fetched, and then stored and
    /// delivered. Group acks name their addressee, so other members drop them.
    pub async fn on_message(
        &self,
        raw: &str,
        listener: Option<Arc<dyn MsgListener>>,
        group_id: Option<&str>,
    ) -> Result<Delivery, ChatError> {
        let msg = self.dispatcher.decode_inbound(raw, group_id)?;
        if msg.is_response() {
            if !msg.to_peer_ids.iter().any(|id| *id == self.self_id) {
                log::debug!("Ack {} is for {:?}", msg.object_id, msg.to_peer_ids);
                return Ok(Delivery::Ignored(msg));
            }
            return self.reconciler.on_response(&msg).map(Delivery::Reconciled);
        }

        self.send_response(&msg);
        let fetched = self.resolve_side_content(&msg).await;
        self.complete_receive(msg, listener.as_ref(), fetched)
    }

    /// Runs [`Self::on_message`] as a background task.
    pub fn spawn_message(
        self: &Arc<Self>,
        raw: String,
        listener: Option<Arc<dyn MsgListener>>,
        group_id: Option<String>,
    ) -> JoinHandle<Result<Delivery, ChatError>> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.on_message(&raw, listener, group_id.as_deref()).await;
            if let Err(err) = &result {
                log::warn!("Dropped inbound message: {err}");
            }
            result
        })
    }

    fn send_response(&self, msg: &Message) {
        let ack = response::build_response(msg, &self.self_id);
        let sent = match &msg.group_id {
            Some(group_id) => self.dispatcher.send_in_group(&ack, group_id),
            None => self.dispatcher.send(&ack),
        };
        if let Err(err) = sent {
            log::warn!("Could not ack {} to {}: {err}", msg.object_id, msg.from_peer_id);
        }
    }

    async fn resolve_side_content(&self, msg: &Message) -> Result<(), ChatError> {
        if msg.msg_type.needs_prefetch() {
            let file = FileContent::parse(&msg.content)?;
            let dest = self.media_path(&msg.object_id)?;
            self.blobs
                .download_if_absent(&file.url, &dest)
                .await
                .map_err(|err| match err {
                    ChatError::SideContentFetch(_) => err,
                    other => ChatError::SideContentFetch(other.to_string()),
                })?;
        }
        if let Err(err) = self.users.cache_user_if_absent(&msg.from_peer_id) {
            log::warn!("No profile for {}: {err}", msg.from_peer_id);
        }
        Ok(())
    }

    /// Continuation of an inbound receive, called once whatever the fetch outcome.
    fn complete_receive(
        &self,
        mut msg: Message,
        listener: Option<&Arc<dyn MsgListener>>,
        fetched: Result<(), ChatError>,
    ) -> Result<Delivery, ChatError> {
        if let Err(err) = fetched {
            log::warn!("Dropping {} from {}: {err}", msg.object_id, msg.from_peer_id);
            self.notifier.transient(Notice::BadNetwork);
            return Err(err);
        }
        if !self.reconciler.on_receive(&mut msg)? {
            log::debug!("Duplicate message {}", msg.object_id);
            return Ok(Delivery::Duplicate(msg));
        }
        Ok(self.deliver(msg, listener))
    }

    fn deliver(&self, msg: Message, listener: Option<&Arc<dyn MsgListener>>) -> Delivery {
        if let Some(listener) = filter_listener(listener, &msg, msg.group_id.as_deref(), &self.self_id)
        {
            listener.on_message(&msg);
            return Delivery::Callback(msg);
        }
        if msg.from_peer_id == self.self_id || !self.prefs.notify_when_news {
            return Delivery::Silent(msg);
        }
        self.notifier.notify(&self.notification_for(&msg));
        Delivery::Notified(msg)
    }

    fn notification_for(&self, msg: &Message) -> Notification {
        let title = self
            .users
            .lookup_user(&msg.from_peer_id)
            .map(|user| user.username)
            .unwrap_or_else(|| msg.from_peer_id.clone());
        let conversation = match &msg.group_id {
            Some(group_id) => Conversation::Group(group_id.clone()),
            None => Conversation::Peer(msg.from_peer_id.clone()),
        };
        Notification::new(title, msg.notify_content(), conversation, &self.prefs)
    }

    // ---- transport outcomes ----

    pub fn on_message_sent(
        &self,
        payload: &str,
        listener: Option<&Arc<dyn MsgListener>>,
    ) -> Result<Option<Message>, ChatError> {
        let Some(msg) = self.reconciler.on_send_ack(payload)? else {
            return Ok(None);
        };
        if let Some(listener) = filter_listener(listener, &msg, msg.group_id.as_deref(), &self.self_id)
        {
            listener.on_message_sent(&msg);
        }
        Ok(Some(msg))
    }

    pub fn on_message_error(
        &self,
        error: &str,
        listener: Option<&Arc<dyn MsgListener>>,
    ) -> Result<Option<Message>, ChatError> {
        let Some(msg) = self.reconciler.on_send_failure(error)? else {
            return Ok(None);
        };
        if let Some(listener) = filter_listener(listener, &msg, msg.group_id.as_deref(), &self.self_id)
        {
            listener.on_message_failure(&msg);
        }
        Ok(Some(msg))
    }

    // ---- history and users ----

    /// Latest message per direct conversation with partner profiles cached.
    pub fn recent_messages_and_cache(&self) -> Result<Vec<RecentMsg>, ChatError> {
        let msgs = self.store().get_recent_messages()?;
        let partners: Vec<String> = msgs
            .iter()
            .map(|msg| msg.chat_user_id(&self.self_id).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Err(err) = self.users.find_users(&partners) {
            log::warn!("Could not cache chat partners: {err}");
        }
        Ok(msgs
            .into_iter()
            .map(|msg| RecentMsg {
                to_user: self.users.lookup_user(msg.chat_user_id(&self.self_id)),
                msg,
            })
            .collect())
    }

    pub fn conversation(
        &self,
        conv_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Message>, ChatError> {
        self.store().get_conversation(conv_id, limit, offset)
    }

    /// Every known user except ourselves.
    pub fn find_chat_users(&self) -> Result<Vec<User>, ChatError> {
        let mut users = self.users.all_users()?;
        users.retain(|user| user.id != self.self_id);
        Ok(users)
    }

    pub fn find_group_members(&self, member_ids: &[String]) -> Result<Vec<User>, ChatError> {
        self.users.find_users(member_ids)
    }
}
