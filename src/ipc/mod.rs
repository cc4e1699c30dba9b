//! Pipe IPC between the owner and its watchdog.
//!
//! The channel is a plain byte pipe carrying `;`-terminated text commands.
//! See [`codec`] for the wire format.

pub mod codec;

pub use codec::{encode_batch, parse, parse_command, Command, Malformed};
