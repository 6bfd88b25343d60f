//! git-lfs custom transfer agent for OpenStack Swift.
//!
//! git-lfs starts the agent as a subprocess and drives it over
//! stdin/stdout with line-delimited JSON (see [`lfs_swift_proto`]). The
//! [`Agent`] reads one request at a time, hands the object to a storage
//! [`Backend`], and reports progress and completion back to git-lfs.
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//!
//! use lfs_swift::{Agent, Config, Swift, handshake};
//! use lfs_swift_proto::Codec;
//!
//! let mut codec = Codec::new(io::stdin().lock(), io::stdout().lock());
//! let operation = handshake(&mut codec)?;
//! Agent::new(Config::new(operation, "/tmp/lfs"), Swift::new()).run(&mut codec)?;
//! # Ok::<(), lfs_swift::Error>(())
//! ```

#![allow(clippy::missing_docs_in_private_items)]

mod agent;
mod error;
pub mod memory;
mod storage;
mod swift;

pub use agent::{Agent, Config, DEFAULT_SEGMENT_SIZE, handshake, split_href};
pub use error::{Error, Result};
pub use storage::{
    Backend, ObjectAction, Outcome, Outcomes, Session, TransferObject, TransferOptions,
};
pub use swift::{Swift, SwiftSession};
