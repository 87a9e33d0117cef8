//! Disconnect classification.
//!
//! Typed signals come first: [`std::io::ErrorKind`] values that mean the peer
//! is gone. Transports that only surface a message string fall back to
//! [`looks_like_disconnect`], a best-effort substring table. The table is not
//! exhaustive and its matches depend on the platform's error wording.

use std::io;

/// `io::ErrorKind`s that mean the peer closed or reset the connection.
const DISCONNECT_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::NotConnected,
    io::ErrorKind::UnexpectedEof,
];

/// Lower-cased fragments seen in disconnect messages from hyper, tokio and libc.
const DISCONNECT_PATTERNS: &[&str] = &[
    "broken pipe",
    "connection reset",
    "connection aborted",
    "connection closed",
    "channel closed",
    "stream closed",
    "client disconnected",
    "not connected",
    "epipe",
    "econnreset",
];

/// Whether an I/O error means the remote end went away.
///
/// Checks the error kind first and only then the message text.
pub fn is_disconnect_io(err: &io::Error) -> bool {
    DISCONNECT_KINDS.contains(&err.kind()) || looks_like_disconnect(&err.to_string())
}

/// Best-effort fallback: does an error message read like a disconnect?
pub fn looks_like_disconnect(message: &str) -> bool {
    let lower = message.to_lowercase();
    DISCONNECT_PATTERNS.iter().any(|p| lower.contains(p))
}
