//! Command sequencer task.
//!
//! The protocol is half-duplex: one command elicits (or forgoes) its reply
//! before the next command may be written. A single spawned task owns the
//! transport and the [`ByteRouter`], pulls requests off a bounded queue in
//! strict submission order, and keeps at most one command in flight. Between
//! the matcher timers and the outer command timeout, first settlement wins;
//! the matcher's terminal guard makes the loser a no-op.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::matcher::{Outcome, ResponseMatcher};
use crate::router::ByteRouter;
use crate::transport::Transport;
use crate::{Result, SerialError};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_PAUSE_BETWEEN_COMMANDS: Duration = Duration::from_millis(10);

const READ_BUF_SIZE: usize = 512;

enum Request {
    Issue {
        cmd: Vec<u8>,
        matcher: ResponseMatcher,
        responder: oneshot::Sender<Result<Vec<u8>>>,
    },
    Shutdown,
}

/// Caller-visible future for a submitted command. Settles once the matcher
/// does.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Vec<u8>>>,
}

impl PendingResponse {
    pub async fn wait(self) -> Result<Vec<u8>> {
        self.rx.await.map_err(|_| SerialError::ConnectionClosed)?
    }
}

/// Builder for a half-duplex connection over a [`Transport`].
pub struct HalfDuplex<T> {
    transport: T,
    command_timeout: Duration,
    pause_between_commands: Duration,
    queue_capacity: usize,
    unexpected_capacity: usize,
}

impl<T: Transport + 'static> HalfDuplex<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            pause_between_commands: DEFAULT_PAUSE_BETWEEN_COMMANDS,
            queue_capacity: 64,
            unexpected_capacity: 256,
        }
    }

    /// Ceiling on how long a command may stay in flight before its matcher
    /// is forced to settle as timed out.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Settling time the device gets between one reply's last byte and the
    /// next command's first byte.
    pub fn pause_between_commands(mut self, pause: Duration) -> Self {
        self.pause_between_commands = pause;
        self
    }

    /// Spawn the sequencer task and hand back the clonable handle.
    pub fn spawn(self) -> HalfDuplexHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.queue_capacity);
        let (unexpected_tx, _unexpected_rx) = broadcast::channel(self.unexpected_capacity);
        let router = ByteRouter::new(unexpected_tx.clone());

        tokio::spawn(sequencer_task(
            self.transport,
            router,
            cmd_rx,
            self.command_timeout,
            self.pause_between_commands,
        ));

        HalfDuplexHandle {
            cmd_tx,
            unexpected_tx,
            command_timeout: self.command_timeout,
        }
    }
}

/// Handle to a running sequencer task.
#[derive(Clone)]
pub struct HalfDuplexHandle {
    cmd_tx: mpsc::Sender<Request>,
    unexpected_tx: broadcast::Sender<Vec<u8>>,
    command_timeout: Duration,
}

impl HalfDuplexHandle {
    /// Enqueue a command. Returns as soon as the request is queued; the
    /// reply settles asynchronously on the returned [`PendingResponse`].
    /// Commands are dispatched in strict submission order.
    pub async fn submit(
        &self,
        cmd: Vec<u8>,
        matcher: ResponseMatcher,
    ) -> Result<PendingResponse> {
        // A silence gap at or beyond the command timeout would let the outer
        // timer truncate legitimately slow replies; reject it up front
        // instead of leaving a runtime race.
        if let Some(gap) = matcher.silence_gap() {
            if gap >= self.command_timeout {
                return Err(SerialError::ProtocolViolation(format!(
                    "silence gap {:?} must be shorter than the command timeout {:?}",
                    gap, self.command_timeout
                )));
            }
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Issue {
                cmd,
                matcher,
                responder: tx,
            })
            .await
            .map_err(|_| SerialError::ConnectionClosed)?;
        Ok(PendingResponse { rx })
    }

    /// Submit and await the reply bytes.
    pub async fn issue(&self, cmd: Vec<u8>, matcher: ResponseMatcher) -> Result<Vec<u8>> {
        self.submit(cmd, matcher).await?.wait().await
    }

    /// Observe byte runs that arrived with no matcher to take them. These
    /// signal a framing mismatch between host expectation and device output.
    pub fn subscribe_unexpected(&self) -> broadcast::Receiver<Vec<u8>> {
        self.unexpected_tx.subscribe()
    }

    /// Stop the sequencer task. Queued and in-flight commands settle with
    /// [`SerialError::ConnectionClosed`].
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Request::Shutdown).await;
    }
}

struct InFlight {
    responder: oneshot::Sender<Result<Vec<u8>>>,
    deadline: Instant,
}

async fn sequencer_task<T: Transport>(
    mut transport: T,
    mut router: ByteRouter,
    mut cmd_rx: mpsc::Receiver<Request>,
    command_timeout: Duration,
    pause_between_commands: Duration,
) {
    let mut in_flight: Option<InFlight> = None;
    // Earliest instant the next command may be written, once set.
    let mut gate: Option<Instant> = None;
    let mut read_buf = [0u8; READ_BUF_SIZE];

    loop {
        // While a command is in flight, watch whichever of the outer command
        // deadline and the matcher's own idle deadline comes first. While
        // idle, watch the inter-command gate if one is pending.
        let wake = match &in_flight {
            Some(flight) => Some(match router.idle_deadline() {
                Some(idle) => idle.min(flight.deadline),
                None => flight.deadline,
            }),
            None => gate,
        };

        tokio::select! {
            maybe_req = cmd_rx.recv(), if in_flight.is_none() && gate.is_none() => {
                match maybe_req {
                    Some(Request::Issue { cmd, mut matcher, responder }) => {
                        matcher.arm_idle();
                        if let Err(e) = router.register(matcher) {
                            let _ = responder.send(Err(e));
                            continue;
                        }
                        if let Err(e) = transport.write_all(&cmd).await {
                            log::error!("Transport write failed: {}", e);
                            router.force_timeout();
                            let _ = router.poll_settled();
                            let _ = responder.send(Err(SerialError::IoError(e)));
                            break;
                        }
                        in_flight = Some(InFlight {
                            responder,
                            deadline: Instant::now() + command_timeout,
                        });
                        // Fire-and-forget matchers settle without any
                        // transport bytes.
                        if let Some(outcome) = router.poll_settled() {
                            settle(&mut in_flight, outcome);
                            gate = Some(Instant::now() + pause_between_commands);
                        }
                    }
                    Some(Request::Shutdown) | None => break,
                }
            },
            read = transport.read_chunk(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        log::warn!("Transport closed by peer");
                        fail(&mut in_flight, SerialError::ConnectionClosed);
                        break;
                    }
                    Ok(n) => {
                        router.route(&read_buf[..n]);
                        if let Some(outcome) = router.poll_settled() {
                            settle(&mut in_flight, outcome);
                            gate = Some(Instant::now() + pause_between_commands);
                        }
                    }
                    Err(e) => {
                        log::error!("Transport read failed: {}", e);
                        fail(&mut in_flight, SerialError::IoError(e));
                        break;
                    }
                }
            },
            _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                if in_flight.is_some() {
                    let now = Instant::now();
                    match router.idle_deadline() {
                        // The matcher's own gap timer fired first.
                        Some(idle) if idle <= now => router.settle_idle(),
                        _ => {
                            log::warn!("Command timeout after {:?}", command_timeout);
                            router.force_timeout();
                        }
                    }
                    if let Some(outcome) = router.poll_settled() {
                        settle(&mut in_flight, outcome);
                        gate = Some(Instant::now() + pause_between_commands);
                    }
                } else {
                    gate = None;
                }
            },
        }
    }

    fail(&mut in_flight, SerialError::ConnectionClosed);
}

fn settle(in_flight: &mut Option<InFlight>, outcome: Outcome) {
    if let Some(flight) = in_flight.take() {
        let result = match outcome {
            Outcome::Complete(bytes) => Ok(bytes),
            Outcome::TimedOut => Err(SerialError::Timeout),
        };
        let _ = flight.responder.send(result);
    }
}

fn fail(in_flight: &mut Option<InFlight>, err: SerialError) {
    if let Some(flight) = in_flight.take() {
        let _ = flight.responder.send(Err(err));
    }
}
