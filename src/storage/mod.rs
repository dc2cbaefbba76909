pub mod client_db;
pub mod database;

pub use client_db::ClientDatabase;

use std::fs;
use std::path::Path;

use crate::common::Message;
use crate::error::ChatError;

/// Persistence collaborator for chat messages.
///
/// Rows are keyed by `object_id`; updates overwrite fields rather than
/// accumulate, so replaying the same event is harmless.
pub trait MessageStore: Send + Sync {
    /// Returns `false` when a row with the same `object_id` already exists.
    fn insert_message(&self, msg: &Message) -> Result<bool, ChatError>;

    fn update_status(&self, msg: &Message) -> Result<(), ChatError>;

    fn update_status_and_timestamp(&self, msg: &Message) -> Result<(), ChatError>;

    /// Latest message of every direct conversation, newest first.
    fn get_recent_messages(&self) -> Result<Vec<Message>, ChatError>;

    fn get_message(&self, object_id: &str) -> Result<Option<Message>, ChatError>;

    fn get_conversation(
        &self,
        conv_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Message>, ChatError>;
}

/// Ensure data directory exists
pub fn ensure_data_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
