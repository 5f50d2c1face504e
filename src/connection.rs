//! Connection actor (C4): owns one TCP connection, pipelines outbound
//! commands, and correlates inbound replies in FIFO order.
//!
//! Owns one transport end to end: a buffered read loop paired with a
//! pipelined request/reply driver, running as an actor with its own
//! mailbox rather than serving one request at a time.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use crate::codec::{Command, Expectation, RValue};
use crate::error::KvError;
use crate::reconstructor::ReplyReconstructor;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// What a connection actor hands back for a completed request: either a
/// decoded reply, or confirmation that a `ConnectionCloseExpected`
/// command was honored and the socket closed.
#[derive(Debug)]
pub enum ActorReply {
    Value(RValue),
    Closed,
}

pub(crate) type ReplySender = oneshot::Sender<Result<ActorReply, KvError>>;

/// Messages the pool (and, through it, the facade) sends to a running
/// connection actor's mailbox.
pub(crate) enum ActorMessage {
    Execute {
        command: Command,
        reply_to: ReplySender,
    },
    /// Requested by the pool during `Client::shutdown`. The actor stops
    /// accepting new work and closes its socket once current work settles.
    Shutdown,
}

/// A handle to a running connection actor: its mailbox and identity.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    pub id: Uuid,
    pub mailbox: mpsc::Sender<ActorMessage>,
}

/// Outcome reported back to the pool when an actor leaves its lifecycle,
/// either by reaching `Ready` or by terminating.
pub(crate) enum PoolEvent {
    Ready { id: Uuid },
    Terminated { id: Uuid, cause: KvError },
}

struct PendingRequest {
    command: Command,
    reply_to: ReplySender,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum State {
    SettingUp,
    Ready,
    Closing,
}

/// Spawns a connection actor as a `tokio` task. Returns immediately with
/// its mailbox handle; lifecycle progress (`Ready`/`Terminated`) is
/// reported asynchronously on `events`.
pub(crate) fn spawn(
    id: Uuid,
    addr: SocketAddr,
    connect_timeout: Duration,
    setup_commands: Arc<Vec<Command>>,
    events: mpsc::Sender<PoolEvent>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(id, addr, connect_timeout, setup_commands, events, rx));
    ConnectionHandle { id, mailbox: tx }
}

async fn run(
    id: Uuid,
    addr: SocketAddr,
    connect_timeout: Duration,
    setup_commands: Arc<Vec<Command>>,
    events: mpsc::Sender<PoolEvent>,
    mailbox: mpsc::Receiver<ActorMessage>,
) {
    let mut mailbox = mailbox;
    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            stash_fail(&mut mailbox, || KvError::ConnectionLost {
                cause: e.to_string(),
            })
            .await;
            let _ = events
                .send(PoolEvent::Terminated {
                    id,
                    cause: KvError::ConnectionLost {
                        cause: e.to_string(),
                    },
                })
                .await;
            return;
        }
        Err(_elapsed) => {
            let cause = KvError::ConnectionLost {
                cause: "connect timed out".into(),
            };
            stash_fail(&mut mailbox, || KvError::ConnectionLost {
                cause: "connect timed out".into(),
            })
            .await;
            let _ = events.send(PoolEvent::Terminated { id, cause }).await;
            return;
        }
    };

    let (mut read_half, mut write_half) = stream.into_split();
    let mut reconstructor = ReplyReconstructor::new();
    let mut read_buf = [0u8; READ_CHUNK_SIZE];

    for cmd in setup_commands.iter() {
        if let Err(cause) = run_setup_command(&mut read_half, &mut write_half, &mut reconstructor, &mut read_buf, cmd).await
        {
            let _ = events.send(PoolEvent::Terminated { id, cause }).await;
            return;
        }
    }

    if events.send(PoolEvent::Ready { id }).await.is_err() {
        // Pool is gone; nothing left to serve.
        return;
    }

    let mut pending: VecDeque<PendingRequest> = VecDeque::new();
    let mut state = State::Ready;
    // True only when `Closing` was entered because a `ConnectionCloseExpected`
    // command was sent (its sender is sitting at some position in `pending`
    // waiting for `ActorReply::Closed`), as opposed to a pool-initiated
    // `Shutdown` with no such command in flight.
    let mut closing_via_command = false;

    let terminal_cause = 'actor: loop {
        tokio::select! {
            biased;

            msg = mailbox.recv(), if state == State::Ready => match msg {
                Some(ActorMessage::Execute { command, reply_to }) => {
                    if let Err(e) = write_half.write_all(&command.encode()).await {
                        let cause = KvError::ConnectionLost { cause: e.to_string() };
                        let _ = reply_to.send(Err(KvError::ConnectionLost { cause: e.to_string() }));
                        break 'actor cause;
                    }
                    let closes = command.expectation() == Expectation::ConnectionCloseExpected;
                    pending.push_back(PendingRequest { command, reply_to });
                    if closes {
                        state = State::Closing;
                        closing_via_command = true;
                    }
                }
                Some(ActorMessage::Shutdown) => {
                    state = State::Closing;
                    let _ = write_half.shutdown().await;
                }
                None => {
                    // The pool dropped its handle; no more requests will
                    // arrive. Close our write side and drain until EOF.
                    state = State::Closing;
                    let _ = write_half.shutdown().await;
                }
            },

            read_result = read_half.read(&mut read_buf) => match read_result {
                Ok(0) => {
                    // Peer closed the socket.
                    if closing_via_command {
                        if let Some(closing) = pending.pop_front() {
                            let _ = closing.reply_to.send(Ok(ActorReply::Closed));
                        }
                    }
                    break 'actor fail_remaining(
                        &mut pending,
                        "connection closed by peer".to_string(),
                    );
                }
                Ok(n) => {
                    let mut correlation_error = None;
                    let decode_result = reconstructor.process(&read_buf[..n], |value| {
                        match pending.pop_front() {
                            Some(p) if p.command.expectation() == Expectation::ConnectionCloseExpected => {
                                // The server answers QUIT-like commands (e.g. `+OK`)
                                // before closing the socket; any non-error reply
                                // here confirms the close, same as observing EOF.
                                let outcome = match value {
                                    RValue::Error(message) => Err(KvError::ErrorReply {
                                        command: p.command,
                                        message,
                                    }),
                                    _ => Ok(ActorReply::Closed),
                                };
                                let _ = p.reply_to.send(outcome);
                            }
                            Some(p) => {
                                let _ = p.reply_to.send(Ok(ActorReply::Value(value)));
                            }
                            None => correlation_error = Some(value),
                        }
                    });
                    if let Err(e) = decode_result {
                        break 'actor KvError::from(e);
                    }
                    if correlation_error.is_some() {
                        break 'actor KvError::ConnectionLost {
                            cause: "reply arrived with no matching pending request".into(),
                        };
                    }
                }
                Err(e) => break 'actor KvError::ConnectionLost { cause: e.to_string() },
            },
        }
    };

    fail_remaining(&mut pending, terminal_cause.to_string());
    drain_mailbox(&mut mailbox, terminal_cause.to_string());
    let _ = events
        .send(PoolEvent::Terminated {
            id,
            cause: terminal_cause,
        })
        .await;
}

fn fail_remaining(pending: &mut VecDeque<PendingRequest>, cause: String) -> KvError {
    while let Some(p) = pending.pop_front() {
        let _ = p.reply_to.send(Err(KvError::ConnectionLost {
            cause: cause.clone(),
        }));
    }
    KvError::ConnectionLost { cause }
}

/// Drains and fails any messages already queued in the mailbox after the
/// actor has decided to terminate, so callers waiting on their oneshot
/// don't hang forever.
fn drain_mailbox(mailbox: &mut mpsc::Receiver<ActorMessage>, cause: String) {
    while let Ok(msg) = mailbox.try_recv() {
        if let ActorMessage::Execute { reply_to, .. } = msg {
            let _ = reply_to.send(Err(KvError::ConnectionLost {
                cause: cause.clone(),
            }));
        }
    }
}

/// During `Connecting`/`SettingUp`, application messages are stashed (per
/// setup) rather than served; since those states never reach this
/// crate's public API before a connect failure, stashed requests are
/// simply failed once the terminal cause is known.
async fn stash_fail(mailbox: &mut mpsc::Receiver<ActorMessage>, cause: impl Fn() -> KvError) {
    while let Ok(msg) = mailbox.try_recv() {
        if let ActorMessage::Execute { reply_to, .. } = msg {
            let _ = reply_to.send(Err(cause()));
        }
    }
}

async fn run_setup_command(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    reconstructor: &mut ReplyReconstructor,
    read_buf: &mut [u8],
    cmd: &Command,
) -> Result<(), KvError> {
    write_half
        .write_all(&cmd.encode())
        .await
        .map_err(|e| KvError::SetupFailed {
            command: cmd.clone(),
            cause: e.to_string(),
        })?;

    loop {
        let mut reply = None;
        let n = read_half
            .read(read_buf)
            .await
            .map_err(|e| KvError::SetupFailed {
                command: cmd.clone(),
                cause: e.to_string(),
            })?;
        if n == 0 {
            return Err(KvError::SetupFailed {
                command: cmd.clone(),
                cause: "connection closed during setup".into(),
            });
        }
        reconstructor
            .process(&read_buf[..n], |value| reply = Some(value))
            .map_err(|e| KvError::SetupFailed {
                command: cmd.clone(),
                cause: e.to_string(),
            })?;
        if let Some(value) = reply {
            return check_setup_reply(cmd, value);
        }
    }
}

fn check_setup_reply(cmd: &Command, reply: RValue) -> Result<(), KvError> {
    if let RValue::Error(message) = &reply {
        return Err(KvError::SetupFailed {
            command: cmd.clone(),
            cause: message.clone(),
        });
    }
    let matches_expectation = match cmd.expectation() {
        Expectation::OkStatusExpected => matches!(&reply, RValue::SimpleString(s) if s == "OK"),
        Expectation::BulkExpected => matches!(reply, RValue::BulkString(_)),
        Expectation::IntegerExpected => matches!(reply, RValue::Integer(_)),
        Expectation::ConnectionCloseExpected | Expectation::Unconstrained => true,
    };
    if matches_expectation {
        Ok(())
    } else {
        Err(KvError::SetupFailed {
            command: cmd.clone(),
            cause: format!("unexpected setup reply: {reply:?}"),
        })
    }
}
