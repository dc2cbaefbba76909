pub mod commands;
pub mod events;
pub mod types;
pub mod wire;

pub use commands::SessionCommand;
pub use events::TransportEvent;
pub use types::{Message, MsgStatus, MsgType, RecentMsg, Recipient, User, now_millis};
pub use wire::{FileContent, LocationContent, WireMessage, check_object_id};
