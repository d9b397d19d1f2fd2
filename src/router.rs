//! Routes raw transport bytes to the single active response matcher.

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::matcher::{Outcome, ResponseMatcher};
use crate::{Result, SerialError};

/// Owns the one active-matcher slot for a connection. Every incoming byte is
/// either handed to the active matcher or published on the unexpected-bytes
/// channel; nothing is dropped silently.
pub struct ByteRouter {
    active: Option<ResponseMatcher>,
    unexpected_tx: broadcast::Sender<Vec<u8>>,
}

impl ByteRouter {
    pub fn new(unexpected_tx: broadcast::Sender<Vec<u8>>) -> Self {
        Self {
            active: None,
            unexpected_tx,
        }
    }

    /// Install a matcher for the next reply. Registering over a live matcher
    /// means the caller broke the one-command-in-flight contract, so it is
    /// reported rather than silently overwriting the previous matcher.
    pub fn register(&mut self, matcher: ResponseMatcher) -> Result<()> {
        if let Some(current) = &self.active {
            if !current.is_terminal() {
                return Err(SerialError::ProtocolViolation(
                    "previous response matcher not finished".into(),
                ));
            }
        }
        self.active = Some(matcher);
        Ok(())
    }

    /// Feed a chunk of transport bytes to the active matcher. Bytes left over
    /// once the matcher settles mid-chunk, or arriving with no matcher at
    /// all, surface on the unexpected channel verbatim and in order. A
    /// framing mismatch is observable, never fatal.
    pub fn route(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            let matcher = match self.active.as_mut() {
                Some(m) if !m.is_terminal() => m,
                _ => break,
            };
            let (terminal, used) = matcher.consume(rest);
            rest = &rest[used..];
            if terminal {
                break;
            }
        }
        if !rest.is_empty() {
            log::warn!("{} unexpected byte(s) with no matcher to take them", rest.len());
            let _ = self.unexpected_tx.send(rest.to_vec());
        }
    }

    /// If the active matcher has settled, clear the slot and take its
    /// outcome.
    pub(crate) fn poll_settled(&mut self) -> Option<Outcome> {
        if self.active.as_ref()?.is_terminal() {
            let mut done = self.active.take()?;
            done.take_outcome()
        } else {
            None
        }
    }

    pub(crate) fn idle_deadline(&self) -> Option<Instant> {
        self.active.as_ref()?.idle_deadline()
    }

    pub(crate) fn settle_idle(&mut self) {
        if let Some(m) = self.active.as_mut() {
            m.settle_idle();
        }
    }

    pub(crate) fn force_timeout(&mut self) {
        if let Some(m) = self.active.as_mut() {
            m.force_timeout();
        }
    }

    #[cfg(test)]
    pub(crate) fn has_active(&self) -> bool {
        self.active.is_some()
    }
}
