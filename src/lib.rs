//! Dialog and transaction core of a SIP user agent.
//!
//! This crate tracks stateful SIP conversations (dialogs), drives the
//! INVITE client state machine, correlates requests with responses
//! through per-dialog transaction tables, and represents/normalizes SIP
//! messages on the wire. Transport framing, the application's dialog
//! registry wiring, and URI parsing are collaborator contracts exposed as
//! traits ([`peer::Peer`], [`registry::DialogRegistry`]) rather than owned
//! by this crate.

pub mod dialog;
pub mod message;
pub mod peer;
pub mod registry;
pub mod transaction;

use crate::dialog::DialogId;
use crate::transaction::key::TransactionKey;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the dialog/transaction core.
#[derive(Debug, Clone)]
pub enum Error {
    MalformedMessage(String),
    MissingHeader(String),
    Timeout,
    ConnectionLost,
    InviteFailed(u16),
    AuthRejected,
    Closed,
    TransactionError(String, TransactionKey),
    DialogError(String, DialogId),
    Error(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedMessage(s) => write!(f, "malformed message: {}", s),
            Error::MissingHeader(s) => write!(f, "missing header: {}", s),
            Error::Timeout => write!(f, "request timed out"),
            Error::ConnectionLost => write!(f, "connection lost"),
            Error::InviteFailed(code) => write!(f, "invite failed with status {}", code),
            Error::AuthRejected => write!(f, "authentication rejected"),
            Error::Closed => write!(f, "dialog closed"),
            Error::TransactionError(s, key) => write!(f, "transaction error: {} ({:?})", s, key),
            Error::DialogError(s, id) => write!(f, "dialog error: {} ({:?})", s, id),
            Error::Error(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Error(e.to_string())
    }
}
