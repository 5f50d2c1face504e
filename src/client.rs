//! Client facade (C6): the asynchronous request/reply API applications
//! call, backed by the resilient pool (C5).
//!
//! `ClientBuilder` is a staged, chainable-method builder. There is no
//! type-state parameter: this crate has exactly one transport kind, so
//! there is nothing for a marker type to distinguish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::codec::{Command, Expectation, RValue};
use crate::connection::ActorReply;
use crate::error::{KvError, KvResult};
use crate::pool::{self, PoolConfig, PoolHandle};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECTIONS: usize = 4;
const DEFAULT_BREAKER_TOLERANCE: u32 = 3;
const DEFAULT_BREAKER_OPEN_BASE: Duration = Duration::from_millis(100);
const DEFAULT_BREAKER_OPEN_CAP: Duration = Duration::from_secs(30);
const DEFAULT_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_BOUND: Duration = Duration::from_secs(30);

/// Staged builder for a [`Client`]. Only `host`/`port` are required; every
/// other knob has a default, declared as a constant near the builder.
pub struct ClientBuilder {
    host: String,
    port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
    connections: usize,
    setup_commands: Vec<Command>,
    breaker_tolerance: u32,
    breaker_open_base: Duration,
    breaker_open_cap: Duration,
    half_open_timeout: Duration,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connections: DEFAULT_CONNECTIONS,
            setup_commands: Vec::new(),
            breaker_tolerance: DEFAULT_BREAKER_TOLERANCE,
            breaker_open_base: DEFAULT_BREAKER_OPEN_BASE,
            breaker_open_cap: DEFAULT_BREAKER_OPEN_CAP,
            half_open_timeout: DEFAULT_HALF_OPEN_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn connections(mut self, n: usize) -> Self {
        assert!(n >= 1, "a pool needs at least one connection");
        self.connections = n;
        self
    }

    /// Sets the ordered list of commands every new connection runs during
    /// `SettingUp`, before it is announced `Ready`.
    pub fn setup_commands(mut self, commands: Vec<Command>) -> Self {
        self.setup_commands = commands;
        self
    }

    pub fn breaker_tolerance(mut self, tolerance: u32) -> Self {
        self.breaker_tolerance = tolerance;
        self
    }

    pub fn breaker_open_periods(mut self, base: Duration, cap: Duration) -> Self {
        self.breaker_open_base = base;
        self.breaker_open_cap = cap;
        self
    }

    pub fn half_open_timeout(mut self, d: Duration) -> Self {
        self.half_open_timeout = d;
        self
    }

    /// Resolves the address and spawns the pool actor. Returns immediately;
    /// the pool creates its connections in the background. Use
    /// [`Client::wait_until_connected`] to block until a minimum number are
    /// ready.
    pub fn build(self) -> KvResult<Client> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| KvError::RequestExecution {
                command: Command::new([b"CONNECT".to_vec()], Expectation::Unconstrained),
                cause: e.to_string(),
            })?;

        let config = PoolConfig {
            addr,
            size: self.connections,
            connect_timeout: self.connect_timeout,
            setup_commands: Arc::new(self.setup_commands),
            breaker_tolerance: self.breaker_tolerance,
            breaker_open_base: self.breaker_open_base,
            breaker_open_cap: self.breaker_open_cap,
            half_open_timeout: self.half_open_timeout,
        };
        let handle = pool::spawn(config);
        Ok(Client {
            pool: handle,
            request_timeout: self.request_timeout,
        })
    }
}

/// An asynchronous handle to a running pool of connections. Cheap to
/// clone: every clone shares the same pool actor.
#[derive(Clone)]
pub struct Client {
    pool: PoolHandle,
    request_timeout: Duration,
}

impl Client {
    pub fn builder(host: impl Into<String>, port: u16) -> ClientBuilder {
        ClientBuilder::new(host, port)
    }

    /// Routes `command` to the pool with a deadline of `request_timeout`
    /// and resolves with the server's success reply.
    pub async fn execute(&self, command: Command) -> KvResult<RValue> {
        let rx = self.pool.execute(command.clone()).await?;
        let outcome = timeout(self.request_timeout, rx).await;
        match outcome {
            Err(_elapsed) => Err(KvError::RequestTimeout { command }),
            Ok(Err(_canceled)) => Err(KvError::RequestExecution {
                command,
                cause: "connection actor dropped the reply channel".into(),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(ActorReply::Closed))) => Err(KvError::UnexpectedReply {
                command,
                reply: RValue::SimpleString("<connection closed>".into()),
            }),
            Ok(Ok(Ok(ActorReply::Value(RValue::Error(message))))) => {
                Err(KvError::ErrorReply { command, message })
            }
            Ok(Ok(Ok(ActorReply::Value(value)))) => Ok(value),
        }
    }

    /// `command` must carry `ConnectionCloseExpected`; resolves once the
    /// connection actor confirms the socket closed.
    pub async fn execute_connection_close(&self, command: Command) -> KvResult<()> {
        if command.expectation() != Expectation::ConnectionCloseExpected {
            return Err(KvError::UnexpectedReply {
                reply: RValue::SimpleString("<not a close command>".into()),
                command,
            });
        }
        let rx = self.pool.execute(command.clone()).await?;
        match timeout(self.request_timeout, rx).await {
            Err(_elapsed) => Err(KvError::RequestTimeout { command }),
            Ok(Err(_canceled)) => Err(KvError::RequestExecution {
                command,
                cause: "connection actor dropped the reply channel".into(),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(ActorReply::Closed))) => Ok(()),
            Ok(Ok(Ok(ActorReply::Value(reply)))) => {
                Err(KvError::UnexpectedReply { command, reply })
            }
        }
    }

    /// Polls `GetRoutees` until the ready set reaches `min_connections` or
    /// `deadline` elapses. Poll interval is `min(deadline/10, 30ms)`.
    pub async fn wait_until_connected(
        &self,
        deadline: Duration,
        min_connections: usize,
    ) -> KvResult<()> {
        let poll_interval = std::cmp::min(deadline / 10, Duration::from_millis(30));
        let outcome = timeout(deadline, async {
            loop {
                if self.pool.routees().await.len() >= min_connections {
                    return;
                }
                sleep(poll_interval).await;
            }
        })
        .await;
        outcome.map_err(|_elapsed| KvError::ConnectTimeout)
    }

    /// Initiates graceful pool shutdown, bounded at 30s.
    pub async fn shutdown(&self) {
        let _ = timeout(SHUTDOWN_BOUND, self.pool.shutdown()).await;
    }
}
