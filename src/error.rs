// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for UMPS operations.

use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by UMPS operations.
///
/// Wire-level parse failures and receive-path I/O errors are logged and the
/// offending datagram is dropped; they never reach this type. This is the
/// surface seen by callers of `publish`, `subscribe`, `unsubscribe`, and
/// façade/endpoint construction.
#[derive(Debug)]
pub enum Error {
    /// Operation attempted before endpoint startup completed, or after close.
    NotConnected,
    /// Unsubscribe of a topic the caller is not currently subscribed to.
    NotSubscribed,
    /// Frame parsing failed: truncated buffer, overrunning topic length, or
    /// invalid UTF-8 topic bytes.
    MalformedFrame(String),
    /// A publish body cannot fit into 255 frames at the 512-byte frame size.
    MessageTooLarge {
        /// The number of frames the body would have required.
        frames: usize,
    },
    /// Façade constructed with a protocol version other than 1.
    UnsupportedProtocolVersion(u8),
    /// The configured network cannot host at least one usable bin (e.g. a
    /// `/31` or `/32`).
    InvalidNetwork(String),
    /// Unrecoverable socket setup failure (bind, join-multicast).
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "endpoint not connected"),
            Self::NotSubscribed => write!(f, "not subscribed to that topic"),
            Self::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Self::MessageTooLarge { frames } => {
                write!(f, "message requires {frames} frames, maximum is 255")
            }
            Self::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version {v}, only version 1 is supported")
            }
            Self::InvalidNetwork(msg) => write!(f, "invalid network: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
