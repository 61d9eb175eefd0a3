//! The error taxonomy shared by every layer of the stack.
//!
//! Every blocking call returns a `Result<_, Error>`; `Error` carries a `[Kind](ErrorKind)`
//! alongside a human-readable message rather than a distinct type per failure site, so that
//! callers can match on the kind without caring which module produced it.

use std::fmt;

/// The taxonomy of failures a caller can match on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raw socket failure, unexpected EOF from the controller transport.
    Transport,
    /// No matching event/response arrived within the configured window.
    Timeout,
    /// Malformed PDU, unexpected opcode, or bad length.
    Protocol,
    /// Operation attempted in a state that forbids it.
    State,
    /// Argument violates a specification-defined range.
    Param,
    /// The peer or controller dropped the link mid-operation.
    Disconnected,
    /// Pairing failed, key mismatch, or insufficient encryption.
    Security,
    /// Feature not advertised by the controller or remote device.
    NotSupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Error { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timeout() -> Self {
        Error::new(ErrorKind::Timeout, "operation timed out")
    }

    pub fn disconnected() -> Self {
        Error::new(ErrorKind::Disconnected, "link disconnected")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
