//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived variant per failure kind; `#[from]` used only
//! where a single external error type maps cleanly onto a variant.

use thiserror::Error;

use crate::codec::{Command, DecodeError, RValue};

/// Every fallible operation this crate exposes returns `KvResult<T>`.
pub type KvResult<T> = std::result::Result<T, KvError>;

/// The full error taxonomy surfaced to callers.
#[derive(Error, Debug)]
pub enum KvError {
    /// The server answered with `Error(text)`.
    #[error("server error for {command}: {message}")]
    ErrorReply { command: Command, message: String },

    /// The reply shape contradicts the command's expectation tag.
    #[error("unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: Command, reply: RValue },

    /// The request's deadline elapsed before a reply arrived.
    #[error("timed out waiting for a reply to {command}")]
    RequestTimeout { command: Command },

    /// The pool had no ready connection at routing time.
    #[error("no ready connection available")]
    NoReadyConnection,

    /// The socket died while requests were still pending on it.
    #[error("connection lost: {cause}")]
    ConnectionLost { cause: String },

    /// Any other cause encountered while executing a command.
    #[error("failed to execute {command}: {cause}")]
    RequestExecution { command: Command, cause: String },

    /// A setup command was rejected during connection bring-up.
    #[error("setup command {command} rejected: {cause}")]
    SetupFailed { command: Command, cause: String },

    /// `wait_until_connected` did not reach the requested ready count in time.
    #[error("timed out waiting for the pool to become ready")]
    ConnectTimeout,

    /// Ambient: raw transport I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Ambient: a frame failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
