//! Resilient pool (C5): supervises a fixed set of connection actors,
//! recreates terminated ones through the circuit breaker, and
//! round-robin-routes requests across the members currently `Ready`.
//!
//! The pool is itself an actor with its own mailbox: it owns a fixed
//! slot table, recreates failed children through the circuit breaker, and
//! hears back from each child through a dedicated completion channel
//! rather than through inherited supervision hooks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::{CircuitBreaker, OpenPeriods};
use crate::codec::Command;
use crate::connection::{self, ActorMessage, ActorReply, PoolEvent};
use crate::error::KvError;

/// Tuning knobs for the pool's supervision behavior.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub addr: SocketAddr,
    pub size: usize,
    pub connect_timeout: Duration,
    pub setup_commands: Arc<Vec<Command>>,
    pub breaker_tolerance: u32,
    pub breaker_open_base: Duration,
    pub breaker_open_cap: Duration,
    pub half_open_timeout: Duration,
}

pub(crate) enum PoolMessage {
    Execute {
        command: Command,
        reply_to: oneshot::Sender<Result<ActorReply, KvError>>,
    },
    GetRoutees {
        reply_to: oneshot::Sender<Vec<Uuid>>,
    },
    Shutdown {
        reply_to: oneshot::Sender<()>,
    },
}

/// A handle the facade holds onto; the pool itself runs as a detached task.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    mailbox: mpsc::Sender<PoolMessage>,
}

impl PoolHandle {
    pub async fn execute(
        &self,
        command: Command,
    ) -> Result<oneshot::Receiver<Result<ActorReply, KvError>>, KvError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(PoolMessage::Execute {
                command,
                reply_to: tx,
            })
            .await
            .map_err(|_| KvError::NoReadyConnection)?;
        Ok(rx)
    }

    pub async fn routees(&self) -> Vec<Uuid> {
        let (tx, rx) = oneshot::channel();
        if self
            .mailbox
            .send(PoolMessage::GetRoutees { reply_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .mailbox
            .send(PoolMessage::Shutdown { reply_to: tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = tokio_timeout(Duration::from_secs(30), rx).await;
    }
}

#[derive(Debug)]
enum Slot {
    Empty,
    Creating {
        id: Uuid,
        since: Instant,
        handle: mpsc::Sender<ActorMessage>,
    },
    Ready {
        id: Uuid,
        handle: mpsc::Sender<ActorMessage>,
    },
    Broken,
}

pub(crate) fn spawn(config: PoolConfig) -> PoolHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(config, rx));
    PoolHandle { mailbox: tx }
}

async fn run(config: PoolConfig, mut mailbox: mpsc::Receiver<PoolMessage>) {
    let mut slots: Vec<Slot> = (0..config.size).map(|_| Slot::Empty).collect();
    let mut breaker = CircuitBreaker::new(
        config.breaker_tolerance,
        OpenPeriods::doubling(config.breaker_open_base, config.breaker_open_cap),
        config.half_open_timeout,
    );
    let mut rr_cursor: usize = 0;
    let (events_tx, mut events_rx) = mpsc::channel::<PoolEvent>(64);
    let mut shutting_down = false;
    let mut shutdown_reply: Option<oneshot::Sender<()>> = None;

    loop {
        create_eligible_children(&config, &mut slots, &mut breaker, &events_tx, shutting_down);

        if shutting_down
            && slots
                .iter()
                .all(|s| matches!(s, Slot::Empty | Slot::Broken))
        {
            if let Some(reply) = shutdown_reply.take() {
                let _ = reply.send(());
            }
            return;
        }

        let wakeup = next_wakeup(&breaker, &slots, &config);

        tokio::select! {
            biased;

            Some(event) = events_rx.recv() => {
                handle_pool_event(event, &mut slots, &mut breaker, shutting_down).await;
            }

            msg = mailbox.recv() => match msg {
                Some(PoolMessage::Execute { command, reply_to }) => {
                    route(&mut slots, &mut rr_cursor, command, reply_to).await;
                }
                Some(PoolMessage::GetRoutees { reply_to }) => {
                    let ready: Vec<Uuid> = slots
                        .iter()
                        .filter_map(|s| match s {
                            Slot::Ready { id, .. } => Some(*id),
                            _ => None,
                        })
                        .collect();
                    let _ = reply_to.send(ready);
                }
                Some(PoolMessage::Shutdown { reply_to }) => {
                    shutting_down = true;
                    shutdown_reply = Some(reply_to);
                    for slot in slots.iter() {
                        if let Slot::Ready { handle, .. } = slot {
                            let _ = handle.send(ActorMessage::Shutdown).await;
                        }
                    }
                }
                None => return,
            },

            _ = tokio::time::sleep_until(wakeup.into()) => {
                debug!("pool maintenance wakeup");
            }
        }
    }
}

/// Promotes/demotes slots in response to a child's lifecycle event and
/// feeds the outcome to the breaker — but only when the event concludes a
/// creation attempt. A child that dies after having already reached
/// `Ready` is steady-state attrition, not a creation failure, and does
/// not affect the breaker.
async fn handle_pool_event(
    event: PoolEvent,
    slots: &mut [Slot],
    breaker: &mut CircuitBreaker,
    shutting_down: bool,
) {
    match event {
        PoolEvent::Ready { id } => {
            let mut promoted_handle = None;
            for slot in slots.iter_mut() {
                if let Slot::Creating {
                    id: sid, handle, ..
                } = slot
                {
                    if *sid == id {
                        let handle = handle.clone();
                        *slot = Slot::Ready {
                            id,
                            handle: handle.clone(),
                        };
                        promoted_handle = Some(handle);
                        break;
                    }
                }
            }
            if let Some(handle) = promoted_handle {
                breaker.on_success();
                info!(child = %id, "connection ready");
                if shutting_down {
                    // This child finished connecting after shutdown began;
                    // it never received the initial broadcast.
                    let _ = handle.send(ActorMessage::Shutdown).await;
                }
            }
        }
        PoolEvent::Terminated { id, cause } => {
            let was_creating = slots
                .iter()
                .any(|s| matches!(s, Slot::Creating { id: sid, .. } if *sid == id));
            if was_creating {
                breaker.on_failure(Instant::now());
                warn!(child = %id, %cause, "connection failed during creation");
            } else {
                warn!(child = %id, %cause, "connection terminated");
            }
            for slot in slots.iter_mut() {
                let matches_id = match slot {
                    Slot::Creating { id: sid, .. } => *sid == id,
                    Slot::Ready { id: sid, .. } => *sid == id,
                    _ => false,
                };
                if matches_id {
                    *slot = Slot::Broken;
                }
            }
        }
    }
}

async fn route(
    slots: &mut [Slot],
    rr_cursor: &mut usize,
    command: Command,
    reply_to: oneshot::Sender<Result<ActorReply, KvError>>,
) {
    let ready_indices: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| matches!(s, Slot::Ready { .. }))
        .map(|(i, _)| i)
        .collect();

    if ready_indices.is_empty() {
        let _ = reply_to.send(Err(KvError::NoReadyConnection));
        return;
    }

    let chosen = ready_indices[*rr_cursor % ready_indices.len()];
    *rr_cursor = rr_cursor.wrapping_add(1);

    if let Slot::Ready { handle, .. } = &slots[chosen] {
        if handle
            .send(ActorMessage::Execute { command, reply_to })
            .await
            .is_err()
        {
            // The child died between being selected and the send landing.
            // Mark the slot broken now so the next routing decision skips
            // it; the caller sees no reply and relies on its own request
            // timeout, per the "no queueing on the caller's behalf" contract.
            slots[chosen] = Slot::Broken;
        }
    }
}

/// Expires creation attempts that have overrun `half_open_timeout`, then
/// starts one creation per slot the breaker currently permits.
fn create_eligible_children(
    config: &PoolConfig,
    slots: &mut [Slot],
    breaker: &mut CircuitBreaker,
    events_tx: &mpsc::Sender<PoolEvent>,
    shutting_down: bool,
) {
    if shutting_down {
        return;
    }
    let now = Instant::now();

    for slot in slots.iter_mut() {
        if let Slot::Creating { since, id, .. } = slot {
            if now.duration_since(*since) >= config.half_open_timeout {
                warn!(child = %id, "connection creation timed out");
                breaker.on_failure(now);
                *slot = Slot::Broken;
            }
        }
    }

    for slot in slots.iter_mut() {
        if matches!(slot, Slot::Empty | Slot::Broken) && breaker.poll_permit(now) {
            let id = Uuid::new_v4();
            let handle = connection::spawn(
                id,
                config.addr,
                config.connect_timeout,
                config.setup_commands.clone(),
                events_tx.clone(),
            );
            *slot = Slot::Creating {
                id,
                since: now,
                handle: handle.mailbox,
            };
        }
    }
}

fn next_wakeup(breaker: &CircuitBreaker, slots: &[Slot], config: &PoolConfig) -> Instant {
    let mut candidates = Vec::new();
    if let Some(w) = breaker.next_wakeup() {
        candidates.push(w);
    }
    for slot in slots {
        if let Slot::Creating { since, .. } = slot {
            candidates.push(*since + config.half_open_timeout);
        }
    }
    candidates
        .into_iter()
        .min()
        .unwrap_or_else(|| Instant::now() + Duration::from_secs(1))
}
