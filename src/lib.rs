//! An asynchronous client for a line-oriented, binary key-value server
//! protocol.
//!
//! The crate maintains a pool of persistent TCP connections, pipelines
//! requests on each, and recreates failed connections under a circuit
//! breaker. Three collaborating pieces carry the weight: an incremental
//! [`reconstructor`] that turns a byte stream into reply values in arrival
//! order, a per-connection actor ([`connection`]) that pipelines commands
//! and correlates replies FIFO, and a [`pool`] that supervises a fixed set
//! of such actors and routes requests across the ones that are `Ready`.
//!
//! # Example
//! ```no_run
//! # async fn example() -> kvpipe::KvResult<()> {
//! use kvpipe::{commands, Client};
//!
//! let client = Client::builder("127.0.0.1", 6379).connections(4).build()?;
//! client.wait_until_connected(std::time::Duration::from_secs(2), 1).await?;
//!
//! client.execute(commands::set("greeting", "hello")).await?;
//! let reply = kvpipe::extractors::execute_bytes(&client, commands::get("greeting")).await?;
//! assert_eq!(reply, Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```
//!
//! Only a handful of commands are provided in [`commands`] — building out
//! the full command catalog, connection-level authentication beyond
//! user-supplied setup commands, pub/sub, transactions, cluster
//! redirection, TLS, and script caching are all left to callers or future
//! work.

mod breaker;
mod client;
pub mod codec;
pub(crate) mod connection;
pub mod extractors;
mod pool;
mod reconstructor;

pub mod commands;
mod error;

pub use client::{Client, ClientBuilder};
pub use codec::{Command, DecodeError, Expectation, RValue};
pub use error::{KvError, KvResult};
