//! Postgres Frontend and Backend Protocol
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte.
//!
//! Incoming bytes are framed by [`MessageDecoder`] into [`Message`], which then decoded
//! into typed [`BackendMessage`]. Outgoing messages are written with [`frontend::write`].
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod pg_type;
mod pg_format;

mod codec;
pub mod frontend;
pub mod backend;

mod error;
mod query_error;

pub use pg_type::{Oid, PgType, oid};
pub use pg_format::PgFormat;

pub use codec::{Message, MessageDecoder, DEFAULT_MAX_MESSAGE_SIZE};
pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol};
pub use error::ProtocolError;
pub use query_error::{QueryError, SqlState};
