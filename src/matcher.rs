//! Per-command response framing state machines.
//!
//! The device's replies carry no uniform framing: a reply is either a known
//! fixed number of bytes, a run of bytes terminated by transmission silence,
//! or nothing at all. Each command therefore picks the matcher that encodes
//! its reply discipline. A matcher consumes incoming bytes incrementally and
//! settles exactly once, after which every further consume or timeout attempt
//! is a no-op.

use std::time::Duration;

use tokio::time::Instant;

/// Default cap for silence-framed replies, matching the largest reply the
/// protocol is known to produce.
pub const DEFAULT_MAX_RESPONSE: usize = 65536;

/// Terminal result of a matcher, taken exactly once by the sequencer.
#[derive(Debug)]
pub(crate) enum Outcome {
    Complete(Vec<u8>),
    TimedOut,
}

enum Kind {
    /// Fire-and-forget command, no reply expected.
    NoResponse,
    /// Reply is exactly `expect` bytes long.
    FixedLength { buf: Vec<u8>, expect: usize },
    /// Reply ends when the device stays silent for `gap`, or when `max_bytes`
    /// have accumulated, whichever happens first.
    Silence {
        gap: Duration,
        max_bytes: usize,
        buf: Vec<u8>,
        deadline: Option<Instant>,
    },
}

/// Framing state machine for one command's reply.
pub struct ResponseMatcher {
    kind: Kind,
    terminal: bool,
    outcome: Option<Outcome>,
}

impl ResponseMatcher {
    /// Matcher for commands the device never answers. Terminal from the
    /// start; resolves to an empty reply without touching the transport.
    pub fn no_response() -> Self {
        Self {
            kind: Kind::NoResponse,
            terminal: true,
            outcome: Some(Outcome::Complete(Vec::new())),
        }
    }

    /// Matcher for replies of exactly `expect` bytes.
    pub fn fixed_length(expect: usize) -> Self {
        let mut m = Self {
            kind: Kind::FixedLength {
                buf: Vec::with_capacity(expect),
                expect,
            },
            terminal: false,
            outcome: None,
        };
        if expect == 0 {
            m.settle(Outcome::Complete(Vec::new()));
        }
        m
    }

    /// Matcher for silence-framed replies with the default size cap.
    pub fn silence_timeout(gap: Duration) -> Self {
        Self::silence_timeout_capped(gap, DEFAULT_MAX_RESPONSE)
    }

    /// Matcher for silence-framed replies, settling early once `max_bytes`
    /// have been buffered.
    pub fn silence_timeout_capped(gap: Duration, max_bytes: usize) -> Self {
        let mut m = Self {
            kind: Kind::Silence {
                gap,
                max_bytes,
                buf: Vec::new(),
                deadline: None,
            },
            terminal: false,
            outcome: None,
        };
        if max_bytes == 0 {
            m.settle(Outcome::Complete(Vec::new()));
        }
        m
    }

    /// Feed incoming bytes. Returns whether the matcher is now terminal and
    /// how many bytes it took from `bytes`; surplus stays with the caller.
    pub fn consume(&mut self, bytes: &[u8]) -> (bool, usize) {
        if self.terminal {
            return (true, 0);
        }
        match &mut self.kind {
            Kind::NoResponse => (true, 0),
            Kind::FixedLength { buf, expect } => {
                let take = bytes.len().min(*expect - buf.len());
                buf.extend_from_slice(&bytes[..take]);
                if buf.len() == *expect {
                    let full = std::mem::take(buf);
                    self.settle(Outcome::Complete(full));
                    (true, take)
                } else {
                    (false, take)
                }
            }
            Kind::Silence {
                gap,
                max_bytes,
                buf,
                deadline,
            } => {
                let take = bytes.len().min(*max_bytes - buf.len());
                buf.extend_from_slice(&bytes[..take]);
                if buf.len() == *max_bytes {
                    let full = std::mem::take(buf);
                    self.settle(Outcome::Complete(full));
                    (true, take)
                } else {
                    if take > 0 {
                        *deadline = Some(Instant::now() + *gap);
                    }
                    (false, take)
                }
            }
        }
    }

    /// Settle as timed out. No-op once terminal, so the race between the
    /// sequencer's command timer and a silence matcher's own gap timer is
    /// decided by whichever fires first.
    pub fn force_timeout(&mut self) {
        if !self.terminal {
            self.settle(Outcome::TimedOut);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Silence gap configured for this matcher, if it has one. Used to
    /// validate that the command timeout leaves the gap room to fire.
    pub fn silence_gap(&self) -> Option<Duration> {
        match &self.kind {
            Kind::Silence { gap, .. } => Some(*gap),
            _ => None,
        }
    }

    /// Arm the idle deadline at command issue time, so a device that never
    /// replies at all still yields an (empty) silence-framed response.
    pub(crate) fn arm_idle(&mut self) {
        if let Kind::Silence { gap, deadline, .. } = &mut self.kind {
            if !self.terminal {
                *deadline = Some(Instant::now() + *gap);
            }
        }
    }

    /// Next instant at which the idle timer would fire, if armed.
    pub(crate) fn idle_deadline(&self) -> Option<Instant> {
        match &self.kind {
            Kind::Silence { deadline, .. } if !self.terminal => *deadline,
            _ => None,
        }
    }

    /// The idle gap elapsed: settle with whatever has accumulated. An empty
    /// buffer is a valid, if empty, reply under silence framing.
    pub(crate) fn settle_idle(&mut self) {
        if self.terminal {
            return;
        }
        if let Kind::Silence { buf, .. } = &mut self.kind {
            let got = std::mem::take(buf);
            self.settle(Outcome::Complete(got));
        }
    }

    /// Take the terminal outcome. Yields `Some` exactly once.
    pub(crate) fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    fn settle(&mut self, outcome: Outcome) {
        self.terminal = true;
        self.outcome = Some(outcome);
        if let Kind::Silence { deadline, .. } = &mut self.kind {
            *deadline = None;
        }
    }
}

impl std::fmt::Debug for ResponseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            Kind::NoResponse => "NoResponse".to_string(),
            Kind::FixedLength { expect, buf } => {
                format!("FixedLength({}/{})", buf.len(), expect)
            }
            Kind::Silence { gap, buf, .. } => {
                format!("Silence(gap {:?}, {} buffered)", gap, buf.len())
            }
        };
        write!(f, "ResponseMatcher({kind}, terminal: {})", self.terminal)
    }
}
