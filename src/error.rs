use thiserror::Error;

/// Failure kinds surfaced at every call boundary of the delivery core.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("side content fetch failed: {0}")]
    SideContentFetch(String),

    #[error("directory lookup failed: {0}")]
    DirectoryLookup(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session for {0} is not open")]
    SessionClosed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Decode(err.to_string())
    }
}

impl ChatError {
    /// Errors worth a "network unavailable" notice on the send path.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_) | ChatError::SessionClosed(_) | ChatError::SideContentFetch(_)
        )
    }
}
