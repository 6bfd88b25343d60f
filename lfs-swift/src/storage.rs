//! Storage backend contract consumed by the transfer loop.
//!
//! A [`Backend`] opens one [`Session`] per agent invocation. Each call to
//! [`Session::transfer`] moves exactly one object and yields its outcomes
//! lazily: for a segmented upload, zero or more [`Outcome::Segment`]
//! followed by one [`Outcome::Object`]; otherwise a single
//! [`Outcome::Object`].

use std::path::PathBuf;

use crate::Result;

/// Settings handed to the backend for every transfer.
///
/// The worker-pool sizes are always 1 so that outcomes for one object
/// arrive as a single ordered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransferOptions {
    /// Storage account URL, e.g. `https://swift.example/v1/AUTH_lfs`.
    pub storage_url: String,
    /// Token sent with every storage request.
    pub auth_token: String,
    /// Files larger than this are uploaded in segments.
    pub segment_size: u64,
    /// Container receiving upload segments.
    pub segment_container: String,
    /// Directory downloads are written into.
    pub out_directory: PathBuf,
    /// Static large objects (manifest with checksums) instead of dynamic ones.
    pub use_slo: bool,
    /// Concurrent container operations.
    pub container_threads: usize,
    /// Concurrent object downloads.
    pub object_dd_threads: usize,
    /// Concurrent object uploads.
    pub object_uu_threads: usize,
}

impl TransferOptions {
    /// Options for `container` with all worker pools pinned to one thread.
    pub fn new(
        storage_url: impl Into<String>,
        auth_token: impl Into<String>,
        container: impl Into<String>,
        segment_size: u64,
        out_directory: impl Into<PathBuf>,
        use_slo: bool,
    ) -> Self {
        Self {
            storage_url: storage_url.into(),
            auth_token: auth_token.into(),
            segment_size,
            segment_container: container.into(),
            out_directory: out_directory.into(),
            use_slo,
            container_threads: 1,
            object_dd_threads: 1,
            object_uu_threads: 1,
        }
    }
}

/// The object a single transfer call moves.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransferObject {
    /// Upload the local file `path` as `name`.
    Upload {
        /// Local source file.
        path: PathBuf,
        /// Remote object name.
        name: String,
    },
    /// Download `name` into [`TransferOptions::out_directory`].
    Download {
        /// Remote object name.
        name: String,
    },
}

/// Whole-object operation an [`Outcome::Object`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObjectAction {
    /// `upload_object`
    Upload,
    /// `download_object`
    Download,
}

/// One event from a backend's outcome stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Outcome {
    /// An upload segment was stored. Segment failures surface as a
    /// failed [`Outcome::Object`] for the same object instead.
    Segment {
        /// Object the segment belongs to.
        for_object: String,
        /// Segment length in bytes.
        bytes: u64,
    },
    /// The object transfer finished.
    Object {
        /// Upload or download.
        action: ObjectAction,
        /// Object name.
        object: String,
        /// Failure description; `None` on success.
        error: Option<String>,
    },
}

impl Outcome {
    /// A stored segment.
    pub fn segment(for_object: impl Into<String>, bytes: u64) -> Self {
        Self::Segment {
            for_object: for_object.into(),
            bytes,
        }
    }

    /// A successful whole-object transfer.
    pub fn done(action: ObjectAction, object: impl Into<String>) -> Self {
        Self::Object {
            action,
            object: object.into(),
            error: None,
        }
    }

    /// A failed whole-object transfer.
    pub fn failed(action: ObjectAction, object: impl Into<String>, error: impl ToString) -> Self {
        Self::Object {
            action,
            object: object.into(),
            error: Some(error.to_string()),
        }
    }
}

/// Lazily produced outcomes of one [`Session::transfer`] call.
///
/// An `Err` item is a call-level fault and ends the session.
pub type Outcomes<'a> = Box<dyn Iterator<Item = Result<Outcome>> + 'a>;

/// Factory for storage sessions.
pub trait Backend {
    /// Connection type. Dropping it releases the connection.
    type Session: Session;

    /// Opens the session used for every transfer of one agent invocation.
    fn connect(&mut self, options: &TransferOptions) -> Result<Self::Session>;
}

/// An open connection to the object store.
pub trait Session {
    /// Starts moving `object` and returns its outcome stream.
    ///
    /// `options` carries the credentials of the request being served;
    /// they may differ from the ones the session was opened with.
    fn transfer(
        &mut self,
        container: &str,
        object: &TransferObject,
        options: &TransferOptions,
    ) -> Result<Outcomes<'_>>;
}
