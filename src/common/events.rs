/// Sự kiện từ tầng mạng gửi lên lõi chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound message body; `group_id` is set when it arrived on a group topic.
    Message {
        payload: String,
        group_id: Option<String>,
    },
    /// The transport accepted one of our sends.
    SendAck { payload: String },
    /// A send failed. `error` is the message body when the failure is attributable.
    SendError { error: String },
    Presence { peer_id: String, online: bool },
    Closed,
}
