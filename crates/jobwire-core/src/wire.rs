//! jobwire wire format — the envelope carried on the controller connection.
//!
//! Every frame is an 8-byte `EnvelopeHeader` followed by `length` body
//! bytes. The header says which kind of message the body holds; the body
//! itself is JSON and is only parsed once the receiver has decided what to
//! do with the kind. Changing the header layout is a breaking change for
//! every controller in the field.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Envelope Header ──────────────────────────────────────────────────────────

/// Fixed-size prefix of every frame.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct EnvelopeHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Message kind, see [`Kind`]. Unknown values are carried through so the
    /// dispatcher can report them.
    pub kind: u8,

    /// Reserved, must be zero.
    pub reserved: [u8; 2],

    /// Body length in bytes, not including this header.
    pub length: U32<BigEndian>,
}

assert_eq_size!(EnvelopeHeader, [u8; 8]);

impl EnvelopeHeader {
    /// Read a header for framing only: the length must be usable, but the
    /// version and reserved bytes are not checked.
    ///
    /// A stream reader can skip a frame that `parse` would reject as long as
    /// this succeeds.
    pub fn peek(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))?;
        let length = header.body_len();
        if length > MAX_BODY {
            return Err(WireError::BodyTooLarge(length));
        }
        Ok(header)
    }

    /// Parse and validate a header from the first `HEADER_LEN` bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::peek(bytes)?;
        if header.version != ENVELOPE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.reserved != [0u8; 2] {
            return Err(WireError::ReservedBytesSet);
        }
        Ok(header)
    }

    /// Declared body length.
    pub fn body_len(&self) -> usize {
        self.length.get() as usize
    }
}

// ── Kind ─────────────────────────────────────────────────────────────────────

/// What the body of an envelope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    /// Controller asks the worker to do something.
    Request = 0x00,
    /// Result of a job. Outbound from the worker, inbound when the worker
    /// relays for another caller.
    Response = 0x01,
    /// Web-originated request. Handled by the controller, never by a worker.
    WebRequest = 0x02,
    /// Result destined for a synchronous web caller.
    WebResponse = 0x03,
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Kind::Request),
            0x01 => Ok(Kind::Response),
            0x02 => Ok(Kind::WebRequest),
            0x03 => Ok(Kind::WebResponse),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<Kind> for u8 {
    fn from(k: Kind) -> u8 {
        k as u8
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A decoded frame: kind tag plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: u8,
    body: Bytes,
}

impl Envelope {
    /// Build an envelope from a known kind and an already-serialized body.
    pub fn new(kind: Kind, body: impl Into<Bytes>) -> Result<Self, WireError> {
        Self::from_parts(kind.into(), body)
    }

    /// Build an envelope from a raw kind byte, known or not.
    pub fn from_parts(kind: u8, body: impl Into<Bytes>) -> Result<Self, WireError> {
        let body = body.into();
        if body.len() > MAX_BODY {
            return Err(WireError::BodyTooLarge(body.len()));
        }
        Ok(Self { kind, body })
    }

    pub fn request(request: &Request) -> Result<Self, WireError> {
        Self::new(Kind::Request, to_body(request)?)
    }

    pub fn response(response: &Response) -> Result<Self, WireError> {
        Self::new(Kind::Response, to_body(response)?)
    }

    pub fn web_response(response: &WebResponse) -> Result<Self, WireError> {
        Self::new(Kind::WebResponse, to_body(response)?)
    }

    /// The kind tag, or `UnknownKind` if this build does not know it.
    pub fn kind(&self) -> Result<Kind, WireError> {
        Kind::try_from(self.kind)
    }

    pub fn kind_byte(&self) -> u8 {
        self.kind
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serialize header + body into a single frame.
    pub fn encode(&self) -> Bytes {
        let header = EnvelopeHeader {
            version: ENVELOPE_VERSION,
            kind: self.kind,
            reserved: [0u8; 2],
            // Bounded by MAX_BODY at construction.
            length: U32::new(self.body.len() as u32),
        };
        let mut frame = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        frame.put_slice(header.as_bytes());
        frame.put_slice(&self.body);
        frame.freeze()
    }

    /// Parse one complete frame. The body is not interpreted.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let header = EnvelopeHeader::parse(frame)?;
        let body = &frame[HEADER_LEN..];
        if body.len() != header.body_len() {
            return Err(WireError::LengthMismatch {
                declared: header.body_len(),
                actual: body.len(),
            });
        }
        Ok(Self {
            kind: header.kind,
            body: Bytes::copy_from_slice(body),
        })
    }

    pub fn decode_request(&self) -> Result<Request, WireError> {
        from_body(&self.body)
    }

    pub fn decode_response(&self) -> Result<Response, WireError> {
        from_body(&self.body)
    }

    pub fn decode_web_response(&self) -> Result<WebResponse, WireError> {
        from_body(&self.body)
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn from_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(body).map_err(|e| WireError::MalformedBody(e.to_string()))
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// Job operation named by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operate {
    HeartBeat,
    Schedule,
    Manual,
    Debug,
    Cancel,
    /// Any operation this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Operate {
    /// Schedule, Manual and Debug all mean "run a job".
    pub fn is_execution(self) -> bool {
        matches!(self, Operate::Schedule | Operate::Manual | Operate::Debug)
    }
}

/// Command from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id. Echoed back on the matching response.
    pub rid: u64,
    pub operate: Operate,
    /// Job-identifying fields. Structure is defined by the executor.
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ok,
    Error,
}

/// Result of a job execution or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub rid: u64,
    pub operate: Operate,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Response {
    pub fn ok(rid: u64, operate: Operate, body: serde_json::Value) -> Self {
        Self {
            rid,
            operate,
            status: Status::Ok,
            error_text: None,
            body,
        }
    }

    pub fn error(rid: u64, operate: Operate, error_text: impl Into<String>) -> Self {
        Self {
            rid,
            operate,
            status: Status::Error,
            error_text: Some(error_text.into()),
            body: serde_json::Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Web-originated operation a `WebResponse` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebOperate {
    ExecuteJob,
    CancelJob,
    UpdateJob,
    ExecuteDebug,
    GenerateAction,
    #[serde(other)]
    Unknown,
}

/// Result destined for a synchronous web caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResponse {
    pub rid: u64,
    pub operate: WebOperate,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<EnvelopeHeader>();

/// Maximum body size in bytes.
pub const MAX_BODY: usize = 8 * 1024 * 1024;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes is shorter than the envelope header")]
    Truncated(usize),

    #[error("unknown envelope version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved header bytes are non-zero")]
    ReservedBytesSet,

    #[error("body length {0} exceeds maximum {}", MAX_BODY)]
    BodyTooLarge(usize),

    #[error("declared body length {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown envelope kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("failed to encode body: {0}")]
    Encode(String),
}

impl WireError {
    /// True for failures that mean the frame itself could not be read.
    pub fn is_malformed_envelope(&self) -> bool {
        matches!(
            self,
            WireError::Truncated(_)
                | WireError::UnknownVersion(_)
                | WireError::ReservedBytesSet
                | WireError::BodyTooLarge(_)
                | WireError::LengthMismatch { .. }
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
