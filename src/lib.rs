//! Message delivery core for a serverless P2P chat client.

pub mod blob;
pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod notify;
pub mod profiles;
pub mod storage;

pub use chat::{ChatRuntime, ChatService, Collaborators, Delivery, ListenerSlot, MsgListener};
pub use common::{Message, MsgStatus, MsgType, Recipient, User};
pub use error::ChatError;
