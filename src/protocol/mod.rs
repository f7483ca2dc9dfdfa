//! Protocol Module
//!
//! Defines the RESP wire protocol spoken with every node.
//!
//! ## Request Format
//! ```text
//! ┌──────────┬─────────────────┬─────────────────┬─────┐
//! │ *<argc>  │ $<len> <name>   │ $<len> <arg 1>  │ ... │
//! └──────────┴─────────────────┴─────────────────┴─────┘
//! ```
//!
//! ## Reply Types
//! - `+` status
//! - `-` error
//! - `:` integer
//! - `$` bulk (`$-1` = null)
//! - `*` multi-bulk (`*-1` = null)

mod codec;
mod command;
mod reply;

pub use codec::{
    decode_reply, decode_request, encode_command, encode_command_into, encode_reply,
    encode_request, read_reply, read_request, write_command, write_reply, CRLF, MAX_BULK_LEN,
};
pub use command::{Colocation, Command, CommandKind, KeyLayout, ReplyShape};
pub use reply::Reply;
