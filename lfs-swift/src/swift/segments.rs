//! Segmented uploads for objects larger than the segment size.
//!
//! Segments are stored as `<name>/segments/<size>/<segment size>/<index>`
//! in the segment container, then tied together by a manifest object:
//! a static large object (SLO, JSON list with per-segment etags) or a
//! dynamic large object (DLO, `X-Object-Manifest` prefix header).

use std::fs::File;
use std::io::Read;

use serde::Serialize;
use tracing::debug;
use ureq::SendBody;

use super::{AUTH_HEADER, Fail, object_url, settle};
use crate::Result;
use crate::storage::{ObjectAction, Outcome, TransferOptions};

/// How a file of `size` bytes is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SegmentPlan {
    size: u64,
    segment_size: u64,
}

impl SegmentPlan {
    pub(super) const fn new(size: u64, segment_size: u64) -> Self {
        Self { size, segment_size }
    }

    /// Whether the file needs more than one request.
    pub(super) const fn is_segmented(&self) -> bool {
        self.segment_size > 0 && self.size > self.segment_size
    }

    /// Number of segments.
    pub(super) const fn count(&self) -> u64 {
        if self.segment_size == 0 {
            return 1;
        }
        self.size.div_ceil(self.segment_size)
    }

    /// Length of segment `index`; the last one may be short.
    pub(super) fn len(&self, index: u64) -> u64 {
        let start = index * self.segment_size;
        self.segment_size.min(self.size.saturating_sub(start))
    }

    /// Common name prefix of all segments of `name`.
    pub(super) fn prefix(&self, name: &str) -> String {
        format!("{name}/segments/{}/{}/", self.size, self.segment_size)
    }

    /// Name of segment `index` of `name`.
    pub(super) fn segment_name(&self, name: &str, index: u64) -> String {
        format!("{}{index:08}", self.prefix(name))
    }
}

/// Entry of an SLO manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(super) struct SloSegment {
    /// `/<container>/<segment name>`
    path: String,
    /// MD5 Swift reported for the segment.
    etag: Option<String>,
    size_bytes: u64,
}

/// Lazily uploads one segment per `next()`, then the manifest.
#[derive(Debug)]
pub(super) struct SegmentedUpload<'a> {
    agent: &'a ureq::Agent,
    options: TransferOptions,
    container: String,
    name: String,
    file: File,
    plan: SegmentPlan,
    next: u64,
    stored: Vec<SloSegment>,
    finished: bool,
}

impl<'a> SegmentedUpload<'a> {
    pub(super) fn new(
        agent: &'a ureq::Agent,
        container: &str,
        name: &str,
        file: File,
        plan: SegmentPlan,
        options: &TransferOptions,
    ) -> Self {
        Self {
            agent,
            options: options.clone(),
            container: container.to_owned(),
            name: name.to_owned(),
            file,
            plan,
            next: 0,
            stored: Vec::new(),
            finished: false,
        }
    }

    /// Streams segment `index` from the current file position.
    fn put_segment(&mut self, index: u64) -> std::result::Result<u64, Fail> {
        let len = self.plan.len(index);
        let segment = self.plan.segment_name(&self.name, index);
        let mut body = (&mut self.file).take(len);

        let resp = self
            .agent
            .put(object_url(
                &self.options,
                &self.options.segment_container,
                &segment,
            ))
            .header(AUTH_HEADER, &self.options.auth_token)
            .send(SendBody::from_reader(&mut body))?;

        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_owned());
        debug!(segment = %segment, len, "segment stored");
        self.stored.push(SloSegment {
            path: format!("/{}/{segment}", self.options.segment_container),
            etag,
            size_bytes: len,
        });
        Ok(len)
    }

    /// Writes the manifest object that joins the stored segments.
    fn put_manifest(&self) -> std::result::Result<(), Fail> {
        let url = object_url(&self.options, &self.container, &self.name);
        let req = self
            .agent
            .put(url)
            .header(AUTH_HEADER, &self.options.auth_token);

        if self.options.use_slo {
            let body = manifest_body(&self.stored)?;
            req.query("multipart-manifest", "put").send(body)?;
        } else {
            let prefix = format!(
                "{}/{}",
                self.options.segment_container,
                self.plan.prefix(&self.name)
            );
            req.header("X-Object-Manifest", &prefix).send_empty()?;
        }
        Ok(())
    }
}

impl Iterator for SegmentedUpload<'_> {
    type Item = Result<Outcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.next < self.plan.count() {
            let index = self.next;
            self.next += 1;
            return Some(match self.put_segment(index) {
                Ok(len) => Ok(Outcome::segment(&self.name, len)),
                Err(fail) => {
                    self.finished = true;
                    settle(ObjectAction::Upload, &self.name, Err(fail))
                }
            });
        }
        self.finished = true;
        Some(settle(ObjectAction::Upload, &self.name, self.put_manifest()))
    }
}

/// JSON body of an SLO manifest.
fn manifest_body(segments: &[SloSegment]) -> std::result::Result<String, Fail> {
    serde_json::to_string(segments).map_err(|e| Fail::Object(e.to_string()))
}
