// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use thiserror::Error;

/// Error taxonomy of the gateway.
///
/// Connection-level failures (`NotConnected`, `LockTimeout`, `Io`) are
/// recovered in-band by the session supervisor; data-level failures are
/// reported to the caller or, for batch operations, recorded in the result
/// map for the affected block only.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Operation attempted while the session stayed down past the connect
    /// timeout.
    #[error("plc not connected")]
    NotConnected,

    /// The session or connect mutex could not be acquired within the lock
    /// timeout. The scheduler retries on its next tick.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// The S7 peer rejected a job or answered with a malformed telegram.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A string value cannot be represented in GBK within the declared size.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Tag path not present in the registry. Rejected at the API boundary
    /// before any I/O.
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
