//! Protocol Module
//!
//! RESP-compatible wire protocol for the network front-end.
//!
//! ## Wire forms
//! ```text
//! +OK\r\n                       simple string
//! -ERR message\r\n              error
//! :42\r\n                       integer
//! $5\r\nhello\r\n               bulk string
//! $-1\r\n                       null bulk string
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n   array (client commands)
//! ```
//!
//! Clients send commands as arrays of bulk strings; the server replies
//! with whichever form the command calls for.

mod command;
mod resp;

pub use command::Command;
pub use resp::{read_value, RespValue};
