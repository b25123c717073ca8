//! Networking for the Senet server: the line protocol, connection
//! bookkeeping, and socket setup.

pub mod codec;
pub mod connections;
pub mod messages;
pub mod platform;

pub use codec::{CodecError, read_message, read_message_from, read_start, write_message};
pub use connections::{ConnectionId, ConnectionLimitReached, ConnectionMap, IdGenerator};
pub use messages::{ErrorCode, Message, MessageKind, Nickname, NicknameError};
pub use platform::{SocketConfig, configure_stream, create_listener};
