//! Protocol message types exchanged with git-lfs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// `error.code` reported for a failed object transfer.
pub const ERROR_CODE_TRANSFER: i32 = 2;

/// Direction of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Local files are pushed to the remote store.
    Upload,
    /// Remote objects are fetched into a local directory.
    Download,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// First message of every session.
///
/// git-lfs also sends `remote`, `concurrent` and `concurrenttransfers`;
/// the agent works strictly sequentially and ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Init {
    /// Direction of every transfer in this session.
    pub operation: Operation,
}

/// Reply to [`Init`]. Serializes to `{}`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InitAck {}

/// Where and how to reach the remote object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Action {
    /// Container URL, `<storage url>/<container>`.
    pub href: String,
    /// Request headers to pass to the storage backend.
    pub header: Header,
}

/// Headers git-lfs forwards from the batch API response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Header {
    /// Swift authentication token.
    #[serde(rename = "x-auth-token")]
    pub auth_token: String,
}

/// A single object transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Request {
    /// Push the local file at `path` as object `oid`.
    Upload {
        /// Content-addressed object id.
        oid: String,
        /// Total object size in bytes.
        size: u64,
        /// Remote location and credentials.
        action: Action,
        /// Local file to read.
        path: PathBuf,
    },
    /// Fetch object `oid` into the session's temp directory.
    Download {
        /// Content-addressed object id.
        oid: String,
        /// Total object size in bytes.
        size: u64,
        /// Remote location and credentials.
        action: Action,
    },
}

impl Request {
    /// Direction of this request.
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Upload { .. } => Operation::Upload,
            Self::Download { .. } => Operation::Download,
        }
    }

    /// Object id.
    pub fn oid(&self) -> &str {
        match self {
            Self::Upload { oid, .. } | Self::Download { oid, .. } => oid,
        }
    }

    /// Declared object size, the reference for all progress accounting.
    pub const fn size(&self) -> u64 {
        match self {
            Self::Upload { size, .. } | Self::Download { size, .. } => *size,
        }
    }

    /// Remote location and credentials.
    pub const fn action(&self) -> &Action {
        match self {
            Self::Upload { action, .. } | Self::Download { action, .. } => action,
        }
    }
}

/// Error payload attached to a failed [`Event::Complete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorInfo {
    /// A per-object transfer failure ([`ERROR_CODE_TRANSFER`]).
    pub fn transfer(message: impl Into<String>) -> Self {
        Self {
            code: ERROR_CODE_TRANSFER,
            message: message.into(),
        }
    }
}

/// Event sent from the agent to git-lfs while a request is in flight.
///
/// For each request the agent emits zero or more [`Event::Progress`]
/// followed by exactly one [`Event::Complete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// Bytes moved so far for `oid`.
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Object id.
        oid: String,
        /// Running total, never above the declared size.
        bytes_so_far: u64,
        /// Increment since the previous progress event.
        bytes_since_last: u64,
    },
    /// Final outcome for `oid`.
    Complete {
        /// Object id.
        oid: String,
        /// Location of the downloaded file (successful downloads only).
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        /// Failure details.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
}

impl Event {
    /// A progress event.
    pub fn progress(oid: impl Into<String>, bytes_so_far: u64, bytes_since_last: u64) -> Self {
        Self::Progress {
            oid: oid.into(),
            bytes_so_far,
            bytes_since_last,
        }
    }

    /// A successful completion; `path` is set for downloads.
    pub fn complete(oid: impl Into<String>, path: Option<&Path>) -> Self {
        Self::Complete {
            oid: oid.into(),
            path: path.map(Path::to_path_buf),
            error: None,
        }
    }

    /// A failed completion with [`ERROR_CODE_TRANSFER`].
    pub fn failed(oid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Complete {
            oid: oid.into(),
            path: None,
            error: Some(ErrorInfo::transfer(message)),
        }
    }
}
