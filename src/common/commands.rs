use super::wire::WireMessage;

/// Lệnh gửi xuống vòng lặp mạng của một session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Publish(WireMessage),
    JoinGroup { group_id: String },
    Watch { peer_ids: Vec<String> },
    Unwatch { peer_ids: Vec<String> },
    Shutdown,
}
