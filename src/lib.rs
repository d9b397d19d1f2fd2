//! Half-duplex command/response engine for serial-attached devices.
//!
//! Many embedded devices speak a request/response protocol over a UART where
//! the framing of a reply is ambiguous: some replies carry a known fixed
//! length, some are terminated only by a gap in transmission, and some
//! commands produce no reply at all. This crate coordinates command issuance
//! with response framing over that single ordered byte pipe, tolerating a
//! slow or silent device without losing byte-stream alignment.
//!
//! The moving parts:
//! - [`ResponseMatcher`] — per-command framing state machine,
//! - [`ByteRouter`] — delivers incoming bytes to the one active matcher,
//! - [`HalfDuplex`] / [`HalfDuplexHandle`] — the sequencer task that
//!   serializes commands, arms timeouts, and resolves caller futures.

pub mod matcher;
pub mod router;
pub mod sequencer;
pub mod transport;

pub use matcher::ResponseMatcher;
pub use router::ByteRouter;
pub use sequencer::{HalfDuplex, HalfDuplexHandle, PendingResponse};
pub use transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Command timeout")]
    Timeout,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] tokio_serial::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
