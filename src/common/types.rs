use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Loại tin nhắn. `Response` is the protocol-internal ack and never reaches the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    #[default]
    Text,
    Image,
    Audio,
    Location,
    Response,
}

impl MsgType {
    pub fn code(self) -> i64 {
        match self {
            MsgType::Text => 0,
            MsgType::Image => 1,
            MsgType::Audio => 2,
            MsgType::Location => 3,
            MsgType::Response => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MsgType::Text),
            1 => Some(MsgType::Image),
            2 => Some(MsgType::Audio),
            3 => Some(MsgType::Location),
            4 => Some(MsgType::Response),
            _ => None,
        }
    }

    /// Content is `<localPath>&<remoteUrl>`.
    pub fn is_file(self) -> bool {
        matches!(self, MsgType::Image | MsgType::Audio)
    }

    /// Types whose blob must be on disk before the message is stored.
    pub fn needs_prefetch(self) -> bool {
        self == MsgType::Audio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MsgStatus {
    #[default]
    SendStart,
    SendSucceeded,
    SendFailed,
    Received,
}

impl MsgStatus {
    pub fn code(self) -> i64 {
        match self {
            MsgStatus::SendStart => 0,
            MsgStatus::SendSucceeded => 1,
            MsgStatus::SendFailed => 2,
            MsgStatus::Received => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MsgStatus::SendStart),
            1 => Some(MsgStatus::SendSucceeded),
            2 => Some(MsgStatus::SendFailed),
            3 => Some(MsgStatus::Received),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != MsgStatus::SendStart
    }
}

/// Where an outbound message goes. Peer and group routing are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Peer(String),
    Group(String),
}

/// Domain model đại diện một tin nhắn chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub object_id: String,
    #[serde(default, rename = "type")]
    pub msg_type: MsgType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub from_peer_id: String,
    #[serde(default)]
    pub to_peer_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub status: MsgStatus,
}

impl Message {
    /// Builds an outbound message in `SendStart`.
    pub fn build(
        msg_type: MsgType,
        content: impl Into<String>,
        from_peer_id: impl Into<String>,
        recipient: Recipient,
        object_id: Option<String>,
        timestamp: Option<i64>,
    ) -> Self {
        let (to_peer_ids, group_id) = match recipient {
            Recipient::Peer(peer_id) => (vec![peer_id], None),
            Recipient::Group(group_id) => (Vec::new(), Some(group_id)),
        };
        Self {
            object_id: object_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            msg_type,
            content: content.into(),
            from_peer_id: from_peer_id.into(),
            to_peer_ids,
            group_id,
            timestamp: timestamp.unwrap_or_else(now_millis),
            status: MsgStatus::SendStart,
        }
    }

    pub fn is_response(&self) -> bool {
        self.msg_type == MsgType::Response
    }

    pub fn recipient(&self) -> Option<Recipient> {
        match (&self.group_id, self.to_peer_ids.first()) {
            (Some(group_id), None) => Some(Recipient::Group(group_id.clone())),
            (None, Some(peer_id)) => Some(Recipient::Peer(peer_id.clone())),
            _ => None,
        }
    }

    /// The other side of a direct conversation as seen by `self_id`.
    pub fn chat_user_id<'a>(&'a self, self_id: &'a str) -> &'a str {
        if self.from_peer_id == self_id {
            self.to_peer_ids
                .first()
                .map(String::as_str)
                .unwrap_or(self_id)
        } else {
            &self.from_peer_id
        }
    }

    /// Conversation key: the group id, or the sorted pair of direct participants.
    pub fn conversation_id(&self) -> String {
        if let Some(group_id) = &self.group_id {
            return group_id.clone();
        }
        let other = self.to_peer_ids.first().map(String::as_str).unwrap_or("");
        let mut pair = [self.from_peer_id.as_str(), other];
        pair.sort_unstable();
        format!("{}:{}", pair[0], pair[1])
    }

    pub fn notify_content(&self) -> String {
        match self.msg_type {
            MsgType::Text => self.content.clone(),
            MsgType::Image => "[image]".to_string(),
            MsgType::Audio => "[voice]".to_string(),
            MsgType::Location => "[location]".to_string(),
            MsgType::Response => String::new(),
        }
    }
}

/// Cached profile of a chat user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Latest message of a direct conversation paired with the partner's profile.
#[derive(Debug, Clone)]
pub struct RecentMsg {
    pub to_user: Option<User>,
    pub msg: Message,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
