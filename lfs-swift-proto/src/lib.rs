//! Wire protocol for git-lfs custom transfer agents.
//!
//! git-lfs talks to a custom agent over the agent's stdin/stdout using
//! line-delimited JSON: one object per line, UTF-8, flushed after every
//! message. See [`Codec`] for the framing and [`Request`] / [`Event`] for
//! the message shapes.

mod codec;
mod message;

pub use codec::{Codec, Error, Result};
pub use message::{
    Action, ERROR_CODE_TRANSFER, ErrorInfo, Event, Header, Init, InitAck, Operation, Request,
};
