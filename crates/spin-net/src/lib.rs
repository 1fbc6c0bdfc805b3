// Session engine for the spin.de chat service: web bring-up, the chat
// socket protocol and the tokio driver that ties them together.

pub mod bringup;
pub mod client;
pub mod directory;
mod dispatch;
pub mod error;
pub mod events;
pub mod framer;
pub mod keepalive;
pub mod moderation;
mod rooms;
pub mod session;
mod sync;
pub mod transport;
pub mod web;

pub use bringup::{Milestone, ReadinessGate};
pub use client::{spawn_client, ClientCommand, ClientConfig};
pub use directory::{BuddyEntry, Directory, MemoryDirectory};
pub use error::{SessionError, TransportError, ValidationError, WebError};
pub use events::SessionEvent;
pub use moderation::Moderation;
pub use session::{Phase, Session, SessionConfig};
pub use transport::{NonBlockingIo, TransportBuffer};
pub use web::{FetchKind, FetchReply, HttpFetcher, WebFetcher, WebRequest};
