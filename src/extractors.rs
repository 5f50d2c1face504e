//! Typed reply extractors. An external-collaborator concern relative to
//! the core pipelining/pooling machinery, but their contract constrains
//! `Client::execute`'s reply typing, so a minimal set lives here as free
//! functions composing over [`Client::execute`].

use crate::client::Client;
use crate::codec::{Command, RValue};
use crate::error::{KvError, KvResult};

/// Expects `Integer`.
pub async fn execute_long(client: &Client, command: Command) -> KvResult<i64> {
    match client.execute(command.clone()).await? {
        RValue::Integer(n) => Ok(n),
        reply => Err(KvError::UnexpectedReply { command, reply }),
    }
}

/// Expects `SimpleString`.
pub async fn execute_string(client: &Client, command: Command) -> KvResult<String> {
    match client.execute(command.clone()).await? {
        RValue::SimpleString(s) => Ok(s),
        reply => Err(KvError::UnexpectedReply { command, reply }),
    }
}

/// Expects `BulkString`; `None` is the protocol's null bulk, not an error.
pub async fn execute_bytes(client: &Client, command: Command) -> KvResult<Option<Vec<u8>>> {
    match client.execute(command.clone()).await? {
        RValue::BulkString(bytes) => Ok(bytes),
        reply => Err(KvError::UnexpectedReply { command, reply }),
    }
}

/// Expects a reply that merely confirms success, discarding its payload.
pub async fn execute_successfully(client: &Client, command: Command) -> KvResult<()> {
    client.execute(command).await.map(|_| ())
}
