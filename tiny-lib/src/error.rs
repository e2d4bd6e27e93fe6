use std::io;
use thiserror::Error;

/// A command field was wider than the bits the wire format gives it.
/// Raised locally; nothing is sent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{field} value {value:#04x} does not fit in {bits} bits")]
    FieldOutOfRange { field: &'static str, value: u8, bits: u32 },
}

/// Failure of the byte stream underneath the protocol.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport closed by peer")]
    Closed,
}

/// Frame alignment could not be recovered on a fresh connection.
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Frame alignment not achieved after {rounds} probe rounds")]
    NotAchieved { rounds: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The primary error type for the `tiny-lib` library.
#[derive(Error, Debug)]
pub enum TinyError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Timeout waiting for the box: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl From<io::Error> for TinyError {
    fn from(err: io::Error) -> Self {
        TinyError::Transport(TransportError::Io(err))
    }
}
