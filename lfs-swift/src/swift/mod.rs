//! OpenStack Swift backend over blocking HTTP.
//!
//! One [`ureq::Agent`] (and its connection pool) lives for the whole
//! session. Every request carries the `X-Auth-Token` of the git-lfs
//! request being served.

mod segments;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::iter;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use ureq::SendBody;

use crate::storage::{
    Backend, ObjectAction, Outcome, Outcomes, Session, TransferObject, TransferOptions,
};
use crate::{Error, Result};

use segments::{SegmentPlan, SegmentedUpload};

/// Swift authentication header.
const AUTH_HEADER: &str = "X-Auth-Token";

/// Suffix of a download that has not been verified yet.
const PARTIAL_SUFFIX: &str = ".part";

/// Opens [`SwiftSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Swift;

impl Swift {
    /// Creates the backend.
    pub const fn new() -> Self {
        Self
    }
}

impl Backend for Swift {
    type Session = SwiftSession;

    fn connect(&mut self, options: &TransferOptions) -> Result<SwiftSession> {
        info!(storage_url = %options.storage_url, "storage session opened");
        Ok(SwiftSession {
            agent: ureq::Agent::new_with_defaults(),
            containers: HashSet::new(),
        })
    }
}

/// A live Swift connection pool.
#[derive(Debug)]
pub struct SwiftSession {
    /// HTTP agent shared by all requests of the session.
    agent: ureq::Agent,
    /// `(storage url, container)` pairs already created in this session.
    containers: HashSet<(String, String)>,
}

impl Session for SwiftSession {
    fn transfer(
        &mut self,
        container: &str,
        object: &TransferObject,
        options: &TransferOptions,
    ) -> Result<Outcomes<'_>> {
        match object {
            TransferObject::Upload { path, name } => self.upload(container, path, name, options),
            TransferObject::Download { name } => {
                let outcome = settle(
                    ObjectAction::Download,
                    name,
                    self.download(container, name, options),
                );
                Ok(Box::new(iter::once(outcome)))
            }
        }
    }
}

impl Drop for SwiftSession {
    fn drop(&mut self) {
        info!("storage session closed");
    }
}

impl SwiftSession {
    /// Uploads `path` as `name`, in segments when it exceeds the segment size.
    fn upload(
        &mut self,
        container: &str,
        path: &Path,
        name: &str,
        options: &TransferOptions,
    ) -> Result<Outcomes<'_>> {
        let prepared = self
            .ensure_container(container, options)
            .and_then(|()| self.ensure_container(&options.segment_container, options))
            .and_then(|()| Ok(fs::metadata(path)?.len()));
        let size = match prepared {
            Ok(size) => size,
            Err(fail) => return one(settle(ObjectAction::Upload, name, Err(fail))),
        };

        let plan = SegmentPlan::new(size, options.segment_size);
        if !plan.is_segmented() {
            let result = self.put_object(container, path, name, options);
            return one(settle(ObjectAction::Upload, name, result));
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => return one(settle(ObjectAction::Upload, name, Err(e.into()))),
        };
        debug!(
            oid = name,
            segments = plan.count(),
            use_slo = options.use_slo,
            "segmented upload"
        );
        Ok(Box::new(SegmentedUpload::new(
            &self.agent,
            container,
            name,
            file,
            plan,
            options,
        )))
    }

    /// Creates `container` once per session and storage URL.
    fn ensure_container(
        &mut self,
        container: &str,
        options: &TransferOptions,
    ) -> std::result::Result<(), Fail> {
        let key = (options.storage_url.clone(), container.to_owned());
        if self.containers.contains(&key) {
            return Ok(());
        }
        self.agent
            .put(format!("{}/{container}", options.storage_url))
            .header(AUTH_HEADER, &options.auth_token)
            .send_empty()?;
        debug!(container, "container ready");
        self.containers.insert(key);
        Ok(())
    }

    /// Streams a whole file into a single object.
    fn put_object(
        &self,
        container: &str,
        path: &Path,
        name: &str,
        options: &TransferOptions,
    ) -> std::result::Result<(), Fail> {
        let mut file = File::open(path)?;
        self.agent
            .put(object_url(options, container, name))
            .header(AUTH_HEADER, &options.auth_token)
            .send(SendBody::from_reader(&mut file))?;
        Ok(())
    }

    /// Fetches `name` into the output directory and verifies its digest.
    fn download(
        &self,
        container: &str,
        name: &str,
        options: &TransferOptions,
    ) -> std::result::Result<(), Fail> {
        fs::create_dir_all(&options.out_directory).map_err(|e| Fail::Fatal(e.into()))?;
        let target = options.out_directory.join(name);
        let partial = partial_path(&options.out_directory, name);

        let resp = self
            .agent
            .get(object_url(options, container, name))
            .header(AUTH_HEADER, &options.auth_token)
            .call()?;

        let written = write_verified(&mut resp.into_body().into_reader(), &partial, name);
        if let Err(fail) = written {
            if let Err(e) = fs::remove_file(&partial) {
                warn!(path = %partial.display(), "cannot remove partial download: {e}");
            }
            return Err(fail);
        }
        fs::rename(&partial, &target)?;
        Ok(())
    }
}

/// Why a single object could not be transferred.
#[derive(Debug)]
enum Fail {
    /// The whole session is unusable.
    Fatal(Error),
    /// Only this object failed; reported to git-lfs.
    Object(String),
}

impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self::Object(e.to_string())
    }
}

impl From<ureq::Error> for Fail {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(code @ (401 | 403)) => {
                Self::Fatal(Error::Unauthorized(format!("HTTP status {code}")))
            }
            other => Self::Object(other.to_string()),
        }
    }
}

/// Turns a step result into the object's final outcome.
///
/// Fatal failures become an `Err` item, ending the session.
fn settle(
    action: ObjectAction,
    name: &str,
    result: std::result::Result<(), Fail>,
) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::done(action, name)),
        Err(Fail::Object(message)) => {
            warn!(oid = name, "transfer failed: {message}");
            Ok(Outcome::failed(action, name, message))
        }
        Err(Fail::Fatal(e)) => Err(e),
    }
}

/// Outcome stream consisting of a single item.
fn one<'a>(outcome: Result<Outcome>) -> Result<Outcomes<'a>> {
    Ok(Box::new(iter::once(outcome)))
}

/// `<storage url>/<container>/<name>`
fn object_url(options: &TransferOptions, container: &str, name: &str) -> String {
    format!("{}/{container}/{name}", options.storage_url)
}

fn partial_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{PARTIAL_SUFFIX}"))
}

/// Copies `reader` into `path`, checking the SHA-256 when `name` is one.
fn write_verified(
    reader: &mut impl io::Read,
    path: &Path,
    name: &str,
) -> std::result::Result<(), Fail> {
    let mut out = HashingWriter {
        inner: File::create(path)?,
        hasher: Sha256::new(),
    };
    io::copy(reader, &mut out)?;
    out.inner.sync_all()?;

    if let Some(expected) = expected_digest(name) {
        let actual = hex::encode(out.hasher.finalize());
        if actual != expected {
            return Err(Fail::Object(format!(
                "digest mismatch: expected {expected}, got {actual}"
            )));
        }
    }
    Ok(())
}

/// The lowercase SHA-256 `name` stands for, if it is one.
fn expected_digest(name: &str) -> Option<String> {
    (name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| name.to_ascii_lowercase())
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
