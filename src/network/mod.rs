pub mod behavior;
pub mod client;
pub mod directory;
pub mod memory;
pub mod session;
pub mod transport;

pub use client::{Libp2pConfig, Libp2pSessionFactory};
pub use directory::SessionDirectory;
pub use memory::MemoryHub;
pub use session::{Group, Session, SessionFactory};

/// Capacity of the transport event and session command channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
