//! The transfer loop: reads requests, drives the storage session, and
//! turns backend outcomes into protocol events.
//!
//! ```text
//! AwaitingRequest ──request──▶ Transferring ──complete──▶ AwaitingRequest
//!        │                          │
//!   terminate / EOF            call-level fault
//!        ▼                          ▼
//!    Terminated                   Fatal
//! ```
//!
//! Requests are served strictly one at a time. The storage session is
//! opened lazily for the first request and dropped on every exit path.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use lfs_swift_proto::{Codec, Event, InitAck, Operation, Request};
use tracing::{debug, info, warn};

use crate::storage::{Backend, ObjectAction, Outcome, Session, TransferObject, TransferOptions};
use crate::{Error, Result};

/// Default segment size for large objects (5 GiB, Swift's object limit).
pub const DEFAULT_SEGMENT_SIZE: u64 = 5 * (1 << 30);

/// Message reported when a backend finishes without an object result.
const NO_RESULT: &str = "storage backend reported no result for the object";

/// Session parameters resolved before the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Direction announced in the handshake.
    pub operation: Operation,
    /// Root directory for downloaded objects.
    pub temp_dir: PathBuf,
    /// Files larger than this are uploaded in segments.
    pub segment_size: u64,
    /// Static instead of dynamic large objects.
    pub use_slo: bool,
}

impl Config {
    /// Configuration with the default segment size and DLO manifests.
    pub fn new(operation: Operation, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            operation,
            temp_dir: temp_dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            use_slo: false,
        }
    }

    /// Overrides the segment size.
    #[must_use]
    pub const fn segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Selects static large objects.
    #[must_use]
    pub const fn use_slo(mut self, enable: bool) -> Self {
        self.use_slo = enable;
        self
    }
}

/// Performs the handshake: reads `init`, replies `{}`.
///
/// Returns the operation git-lfs announced.
pub fn handshake<R: BufRead, W: Write>(codec: &mut Codec<R, W>) -> Result<Operation> {
    let init = codec.read_init()?;
    codec.write(&InitAck::default())?;
    Ok(init.operation)
}

/// A transfer agent bound to a storage backend.
#[derive(Debug)]
pub struct Agent<B> {
    /// Session parameters.
    config: Config,
    /// Opens the storage session on the first request.
    backend: B,
}

impl<B: Backend> Agent<B> {
    /// Creates an agent; nothing is opened until [`Agent::run`] sees a request.
    pub const fn new(config: Config, backend: B) -> Self {
        Self { config, backend }
    }

    /// Serves requests until terminate or end of input.
    ///
    /// Per-object failures are reported to git-lfs and do not stop the
    /// loop. Any returned error is fatal for the session.
    pub fn run<R: BufRead, W: Write>(&mut self, codec: &mut Codec<R, W>) -> Result<()> {
        let Some(mut request) = self.next_request(codec)? else {
            return Ok(());
        };

        let (storage_url, container) = split_href(&request.action().href)?;
        let mut options = TransferOptions::new(
            storage_url,
            request.action().header.auth_token.clone(),
            container.clone(),
            self.config.segment_size,
            self.config.temp_dir.clone(),
            self.config.use_slo,
        );
        debug!(
            storage_url = %options.storage_url,
            container = %container,
            segment_size = options.segment_size,
            out_directory = %options.out_directory.display(),
            use_slo = options.use_slo,
            "options"
        );

        let mut session = self.backend.connect(&options)?;
        loop {
            serve(&mut session, codec, &container, &options, &request)?;

            match self.next_request(codec)? {
                Some(next) => request = next,
                None => break,
            }
            refresh(&mut options, &container, &request)?;
        }
        info!("transfer session finished");
        Ok(())
    }

    /// Reads a request and checks it matches the session's direction.
    fn next_request<R: BufRead, W: Write>(
        &self,
        codec: &mut Codec<R, W>,
    ) -> Result<Option<Request>> {
        let Some(request) = codec.read_request()? else {
            return Ok(None);
        };
        if request.operation() != self.config.operation {
            return Err(lfs_swift_proto::Error::Unexpected(format!(
                "{} request for {} in a {} session",
                request.operation(),
                request.oid(),
                self.config.operation
            ))
            .into());
        }
        Ok(Some(request))
    }
}

/// Splits `<storage url>/<container>` at its last `/`.
///
/// A trailing slash is ignored.
pub fn split_href(href: &str) -> Result<(String, String)> {
    match href.trim_end_matches('/').rsplit_once('/') {
        Some((url, container)) if !url.is_empty() && !container.is_empty() => {
            Ok((url.to_owned(), container.to_owned()))
        }
        _ => Err(Error::InvalidHref(href.to_owned())),
    }
}

/// Takes URL and token from a follow-up request.
///
/// The container stays the one of the first request.
fn refresh(options: &mut TransferOptions, container: &str, request: &Request) -> Result<()> {
    let (storage_url, requested) = split_href(&request.action().href)?;
    if requested != container {
        warn!(
            requested = %requested,
            container = %container,
            "request names another container; keeping the session's"
        );
    }
    options.storage_url = storage_url;
    options.auth_token.clone_from(&request.action().header.auth_token);
    Ok(())
}

/// Transfers one object and reports its progress and completion.
fn serve<S: Session, R: BufRead, W: Write>(
    session: &mut S,
    codec: &mut Codec<R, W>,
    container: &str,
    options: &TransferOptions,
    request: &Request,
) -> Result<()> {
    let object = match request {
        Request::Upload { oid, path, .. } => TransferObject::Upload {
            path: path.clone(),
            name: oid.clone(),
        },
        Request::Download { oid, .. } => TransferObject::Download { name: oid.clone() },
    };
    debug!(oid = request.oid(), size = request.size(), "transfer start");

    let mut tracker = Tracker::new(request.size(), &options.out_directory);
    for outcome in session.transfer(container, &object, options)? {
        for event in tracker.record(outcome?) {
            codec.write(&event)?;
        }
    }

    if !tracker.is_complete(request.oid()) {
        warn!(oid = request.oid(), "{NO_RESULT}");
        codec.write(&Event::failed(request.oid(), NO_RESULT))?;
    }
    Ok(())
}

/// Byte accounting for the outcomes of one request.
#[derive(Debug)]
struct Tracker<'a> {
    /// Declared size of the requested object.
    size: u64,
    /// Where downloads land.
    temp_dir: &'a Path,
    /// Bytes reported so far, per object.
    so_far: HashMap<String, u64>,
    /// Objects a `complete` event was produced for.
    completed: Vec<String>,
}

impl<'a> Tracker<'a> {
    fn new(size: u64, temp_dir: &'a Path) -> Self {
        Self {
            size,
            temp_dir,
            so_far: HashMap::new(),
            completed: Vec::new(),
        }
    }

    fn is_complete(&self, oid: &str) -> bool {
        self.completed.iter().any(|o| o == oid)
    }

    /// Maps one outcome to the events git-lfs expects.
    fn record(&mut self, outcome: Outcome) -> Vec<Event> {
        match outcome {
            Outcome::Segment { for_object, bytes } => {
                let so_far = self.so_far.entry(for_object.clone()).or_insert(0);
                *so_far += bytes;
                vec![Event::progress(for_object, *so_far, bytes)]
            }
            Outcome::Object {
                object,
                error: Some(error),
                ..
            } => {
                self.completed.push(object.clone());
                let message = if error.is_empty() {
                    "transfer failed".to_owned()
                } else {
                    error
                };
                vec![Event::failed(object, message)]
            }
            Outcome::Object {
                action: ObjectAction::Upload,
                object,
                error: None,
            } => {
                self.completed.push(object.clone());
                let so_far = self.so_far.get(&object).copied().unwrap_or(0);
                let mut events = Vec::with_capacity(2);
                // Unsegmented uploads report nothing until the end.
                if so_far < self.size {
                    events.push(Event::progress(&object, self.size, self.size - so_far));
                }
                events.push(Event::complete(object, None));
                events
            }
            Outcome::Object {
                action: ObjectAction::Download,
                object,
                error: None,
            } => {
                self.completed.push(object.clone());
                let path = self.temp_dir.join(&object);
                vec![
                    Event::progress(&object, self.size, self.size),
                    Event::complete(object, Some(&path)),
                ]
            }
        }
    }
}
