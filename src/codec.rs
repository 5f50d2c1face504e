//! Wire codec (C1): command encoding and the leading-byte/length primitives
//! the reply reconstructor (C2) drives to decode frames.
//!
//! `Command` and `RValue` follow a conventional framing shape, close to
//! the `RespValue` variants used by typical RESP client implementations.

use std::fmt;

use thiserror::Error;

const CRLF: &[u8] = b"\r\n";

/// Static marker on a command identifying the reply shape its caller may
/// assume. A closed enum, so "unknown expectations" cannot occur at the
/// type boundary — the facade never needs a runtime check for that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expectation {
    BulkExpected,
    IntegerExpected,
    OkStatusExpected,
    ConnectionCloseExpected,
    Unconstrained,
}

/// An immutable, deterministically-serializable command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
    expectation: Expectation,
}

impl Command {
    /// Builds a command from an ordered argument list and its expectation tag.
    ///
    /// # Panics
    /// Panics if `args` is empty — a command always names itself as `args[0]`.
    pub fn new<A, I>(args: I, expectation: Expectation) -> Self
    where
        A: Into<Vec<u8>>,
        I: IntoIterator<Item = A>,
    {
        let args: Vec<Vec<u8>> = args.into_iter().map(Into::into).collect();
        assert!(!args.is_empty(), "a command must carry at least its name");
        Self { args, expectation }
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    fn name(&self) -> &str {
        std::str::from_utf8(&self.args[0]).unwrap_or("?")
    }

    /// Serializes as `*n\r\n` followed by `$len\r\n<bytes>\r\n` per argument.
    /// Never emits inline commands.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.args.iter().map(|a| a.len() + 16).sum::<usize>());
        out.extend_from_slice(format!("*{}\r\n", self.args.len()).as_bytes());
        for arg in &self.args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(CRLF);
        }
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded reply value. `SimpleString`, `Integer`, `BulkString`, and
/// `Array` form the "success" subtype; `Error` is disjoint.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RValue>>),
}

impl RValue {
    pub fn is_success(&self) -> bool {
        !matches!(self, RValue::Error(_))
    }

    /// Encodes a value the way a server would, for test fixtures and the
    /// scripted mock server used by the integration tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            RValue::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            RValue::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            RValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RValue::BulkString(Some(bytes)) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(bytes);
                out.extend_from_slice(CRLF);
            }
            RValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RValue::Array(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

/// Errors raised while decoding a frame. Fatal to the connection that
/// raised them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("bad length or count")]
    BadLength,
    #[error("expected CRLF terminator")]
    UnexpectedTerminator,
}

/// Scans `buf` for the first CRLF, returning the content before it and the
/// total byte count consumed (including the terminator). `None` means the
/// terminator hasn't arrived yet — more bytes are needed.
pub(crate) fn scan_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    // A bare `\r` without a following `\n` is simply "not found yet" —
    // the only way to fail is a malformed decimal body, checked by the caller.
    let pos = buf.windows(2).position(|w| w == CRLF)?;
    Some((&buf[..pos], pos + 2))
}

/// Parses an ASCII decimal integer, allowing a leading `-` (for the `-1`
/// null sentinel only — callers reject other negative values themselves).
pub(crate) fn parse_decimal(bytes: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(DecodeError::BadLength)
}
