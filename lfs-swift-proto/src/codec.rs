//! Line-delimited JSON codec over any `BufRead`/`Write` pair.
//!
//! Each message is one JSON object followed by `\n`. Writes are flushed
//! immediately because git-lfs blocks on every reply.

use std::io::{self, BufRead, Write};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::message::{Init, Request};

/// Alias for `Result<T, lfs_swift_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Framing errors on the control channel. All of them end the session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The line is not JSON, or lacks fields its `event` requires.
    #[error("malformed message {line:?}: {source}")]
    Malformed {
        /// The offending line, without its terminator.
        line: String,
        /// Decoder error.
        source: serde_json::Error,
    },

    /// Valid JSON whose discriminant is not allowed at this point.
    #[error("unexpected message: {0}")]
    Unexpected(String),

    /// The peer closed the channel before the handshake.
    #[error("control channel closed before init")]
    Closed,

    /// A reply could not be serialized.
    #[error("cannot encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Reading or writing the channel failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads requests from and writes events to the control channel.
#[derive(Debug)]
pub struct Codec<R, W> {
    /// Control input (git-lfs → agent).
    reader: R,
    /// Control output (agent → git-lfs).
    writer: W,
    /// Reused line buffer.
    line: String,
}

impl<R: BufRead, W: Write> Codec<R, W> {
    /// Wraps a reader/writer pair.
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    /// Reads the handshake message.
    ///
    /// Anything other than `{"event":"init",...}` is [`Error::Unexpected`].
    pub fn read_init(&mut self) -> Result<Init> {
        let Some(value) = self.read_value()? else {
            return Err(Error::Closed);
        };
        if event(&value) != Some("init") {
            return Err(Error::Unexpected(self.trimmed().to_owned()));
        }
        let init = self.decode(value)?;
        info!("init message received");
        Ok(init)
    }

    /// Reads the next transfer request.
    ///
    /// Returns `Ok(None)` on a terminate message (`"type"` or `"event"`
    /// equal to `"terminate"`) and on end of input.
    pub fn read_request(&mut self) -> Result<Option<Request>> {
        let Some(value) = self.read_value()? else {
            info!("control channel closed");
            return Ok(None);
        };
        if is_terminate(&value) {
            info!("terminate message received");
            return Ok(None);
        }
        match event(&value) {
            Some("upload" | "download") => self.decode(value).map(Some),
            _ => Err(Error::Unexpected(self.trimmed().to_owned())),
        }
    }

    /// Serializes `msg` as one line and flushes it.
    pub fn write<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(msg).map_err(Error::Encode)?;
        debug!(msg = %String::from_utf8_lossy(&buf), "write msg");
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Unwraps the codec, returning the underlying reader and writer.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Reads one line and parses it as JSON. `None` at end of input.
    fn read_value(&mut self) -> Result<Option<Value>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        debug!(msg = self.trimmed(), "received msg");
        serde_json::from_str(self.trimmed())
            .map(Some)
            .map_err(|source| self.malformed(source))
    }

    /// Decodes an already-parsed value into a typed message.
    fn decode<T: serde::de::DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|source| self.malformed(source))
    }

    fn malformed(&self, source: serde_json::Error) -> Error {
        Error::Malformed {
            line: self.trimmed().to_owned(),
            source,
        }
    }

    /// The current line without its terminator.
    fn trimmed(&self) -> &str {
        self.line.trim_end_matches(['\r', '\n'])
    }
}

/// The `event` discriminant of a message, if present.
fn event(value: &Value) -> Option<&str> {
    value.get("event").and_then(Value::as_str)
}

/// Whether `value` asks the agent to shut down.
fn is_terminate(value: &Value) -> bool {
    ["type", "event"]
        .iter()
        .any(|key| value.get(key).and_then(Value::as_str) == Some("terminate"))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{Event, InitAck, Operation};

    fn codec(input: &str) -> Codec<Cursor<Vec<u8>>, Vec<u8>> {
        Codec::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn reads_init() {
        let mut c = codec("{\"event\":\"init\",\"operation\":\"upload\"}\n");
        assert_eq!(c.read_init().unwrap().operation, Operation::Upload);
    }

    #[test]
    fn init_rejects_other_events() {
        let mut c = codec("{\"event\":\"upload\",\"oid\":\"a\"}\n");
        assert!(matches!(c.read_init(), Err(Error::Unexpected(_))));
    }

    #[test]
    fn init_on_empty_input_is_closed() {
        assert!(matches!(codec("").read_init(), Err(Error::Closed)));
    }

    #[test]
    fn init_with_unknown_operation_is_malformed() {
        let mut c = codec("{\"event\":\"init\",\"operation\":\"copy\"}\n");
        assert!(matches!(c.read_init(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn reads_upload_request() {
        let mut c = codec(concat!(
            r#"{"event":"upload","oid":"abc","size":3,"path":"/tmp/f","#,
            r#""action":{"href":"https://swift/v1/AUTH_x/lfs","header":{"x-auth-token":"tok"}}}"#,
            "\n"
        ));
        let req = c.read_request().unwrap().unwrap();
        assert_eq!(req.oid(), "abc");
        assert_eq!(req.size(), 3);
        assert_eq!(req.operation(), Operation::Upload);
        assert_eq!(req.action().header.auth_token, "tok");
    }

    #[test]
    fn terminate_by_event_or_type() {
        assert!(codec("{\"event\":\"terminate\"}\n").read_request().unwrap().is_none());
        assert!(codec("{\"type\":\"terminate\"}\n").read_request().unwrap().is_none());
    }

    #[test]
    fn end_of_input_terminates() {
        assert!(codec("").read_request().unwrap().is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = codec("not json\n").read_request().unwrap_err();
        assert!(matches!(err, Error::Malformed { ref line, .. } if line == "not json"));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = codec("{\"event\":\"download\",\"oid\":\"a\"}\n").read_request().unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn unknown_event_is_unexpected() {
        for line in ["{\"event\":\"init\",\"operation\":\"upload\"}\n", "{\"foo\":1}\n", "[1]\n"] {
            let err = codec(line).read_request().unwrap_err();
            assert!(matches!(err, Error::Unexpected(_)), "{line}");
        }
    }

    #[test]
    fn writes_one_line_per_message() {
        let mut c = codec("");
        c.write(&InitAck::default()).unwrap();
        c.write(&Event::progress("abc", 3, 3)).unwrap();
        let (_, out) = c.into_inner();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "{}");
        assert!(out.ends_with('\n'));
    }
}
