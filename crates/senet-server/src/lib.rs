//! Senet match server: accepts TCP clients, pairs them into matches, and
//! relays turns between the two players of each match.

pub mod server;
pub mod session;

pub use server::{GameServer, ServerConfig};
pub use session::{Session, SessionEnd, SessionSettings};
