use rusqlite::{OptionalExtension, Result as SqlResult, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::common::{Message, MsgStatus, MsgType};
use crate::error::ChatError;

use super::MessageStore;
use super::database::Database;

const MIGRATIONS: &[&str] = &["CREATE TABLE IF NOT EXISTS messages (
        object_id TEXT PRIMARY KEY,
        msg_type INTEGER NOT NULL,
        content TEXT NOT NULL,
        from_peer_id TEXT NOT NULL,
        to_peer_ids TEXT NOT NULL,
        group_id TEXT,
        conv_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status INTEGER NOT NULL,
        created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conv_timestamp ON messages(conv_id, timestamp);"];

const MESSAGE_COLUMNS: &str =
    "object_id, msg_type, content, from_peer_id, to_peer_ids, group_id, timestamp, status";

/// SQLite-backed message history of one local identity.
pub struct ClientDatabase {
    db: Mutex<Database>,
}

/// Raw column values before the type/status codes are validated.
struct MessageRow {
    object_id: String,
    msg_type: i64,
    content: String,
    from_peer_id: String,
    to_peer_ids: String,
    group_id: Option<String>,
    timestamp: i64,
    status: i64,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            object_id: row.get(0)?,
            msg_type: row.get(1)?,
            content: row.get(2)?,
            from_peer_id: row.get(3)?,
            to_peer_ids: row.get(4)?,
            group_id: row.get(5)?,
            timestamp: row.get(6)?,
            status: row.get(7)?,
        })
    }

    fn into_message(self) -> Result<Message, ChatError> {
        let msg_type = MsgType::from_code(self.msg_type).ok_or_else(|| {
            ChatError::Decode(format!("unknown message type {} in store", self.msg_type))
        })?;
        let status = MsgStatus::from_code(self.status).ok_or_else(|| {
            ChatError::Decode(format!("unknown message status {} in store", self.status))
        })?;
        Ok(Message {
            object_id: self.object_id,
            msg_type,
            content: self.content,
            from_peer_id: self.from_peer_id,
            to_peer_ids: serde_json::from_str(&self.to_peer_ids)?,
            group_id: self.group_id,
            timestamp: self.timestamp,
            status,
        })
    }
}

impl ClientDatabase {
    /// Initialize client database at custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, ChatError> {
        Self::init(Database::new(path)?)
    }

    pub fn in_memory() -> Result<Self, ChatError> {
        Self::init(Database::in_memory()?)
    }

    fn init(mut db: Database) -> Result<Self, ChatError> {
        db.migrate(MIGRATIONS)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>, ChatError> {
        let db = self.lock();
        let mut stmt = db.connection().prepare(sql)?;
        let rows = stmt
            .query_map(params, MessageRow::from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Get message count
    pub fn message_count(&self) -> Result<usize, ChatError> {
        let db = self.lock();
        let count: i64 =
            db.connection()
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MessageStore for ClientDatabase {
    fn insert_message(&self, msg: &Message) -> Result<bool, ChatError> {
        let to_peer_ids = serde_json::to_string(&msg.to_peer_ids)
            .map_err(|err| ChatError::InvalidMessage(err.to_string()))?;
        let db = self.lock();
        let inserted = db.connection().execute(
            "INSERT OR IGNORE INTO messages
                (object_id, msg_type, content, from_peer_id, to_peer_ids, group_id, conv_id, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.object_id,
                msg.msg_type.code(),
                msg.content,
                msg.from_peer_id,
                to_peer_ids,
                msg.group_id,
                msg.conversation_id(),
                msg.timestamp,
                msg.status.code(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn update_status(&self, msg: &Message) -> Result<(), ChatError> {
        let db = self.lock();
        db.connection().execute(
            "UPDATE messages SET status = ?1 WHERE object_id = ?2",
            params![msg.status.code(), msg.object_id],
        )?;
        Ok(())
    }

    fn update_status_and_timestamp(&self, msg: &Message) -> Result<(), ChatError> {
        let db = self.lock();
        db.connection().execute(
            "UPDATE messages SET status = ?1, timestamp = ?2 WHERE object_id = ?3",
            params![msg.status.code(), msg.timestamp, msg.object_id],
        )?;
        Ok(())
    }

    fn get_recent_messages(&self) -> Result<Vec<Message>, ChatError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE group_id IS NULL
               AND timestamp = (SELECT MAX(timestamp) FROM messages WHERE conv_id = m.conv_id)
             GROUP BY conv_id
             ORDER BY timestamp DESC"
        );
        self.query_messages(&sql, [])
    }

    fn get_message(&self, object_id: &str) -> Result<Option<Message>, ChatError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE object_id = ?1");
        let db = self.lock();
        let row = db
            .connection()
            .query_row(&sql, params![object_id], MessageRow::from_row)
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    fn get_conversation(
        &self,
        conv_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Message>, ChatError> {
        let limit = limit.unwrap_or(100) as i64;
        let offset = offset.unwrap_or(0) as i64;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conv_id = ?1
             ORDER BY timestamp ASC
             LIMIT ?2 OFFSET ?3"
        );
        self.query_messages(&sql, params![conv_id, limit, offset])
    }
}
