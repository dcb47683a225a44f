//! # Error Types
//!
//! Error handling for the R2 network core.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O failures to packet codec violations and
//! lifecycle misuse.
//!
//! ## Error Categories
//! - **Codec errors**: truncated headers/bodies, length mismatches, oversized
//!   payloads. Returned to the caller; on the read path they are fatal to
//!   the offending session, never to the process.
//! - **State errors**: `InvalidState`, `AlreadyStarted`. Programmer errors
//!   surfaced as results.
//! - **I/O errors**: socket failures; terminate the session cleanly.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("packet header requires 6 bytes, got {0}")]
    ShortHeader(usize),

    #[error("packet body underflow: needed {needed} more bytes, {remaining} remaining")]
    ShortBody { needed: usize, remaining: usize },

    #[error("declared frame length {declared} does not fit buffer of {actual} bytes")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("packet body of {0} bytes exceeds the 65529-byte maximum")]
    PayloadTooLarge(usize),

    #[error("obfuscation keys have not been initialized")]
    KeysNotInitialized,

    #[error("key blob must be at least 6 bytes, got {0}")]
    KeyBlobTooShort(usize),

    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("server is already started")]
    AlreadyStarted,

    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using NetError.
pub type Result<T> = std::result::Result<T, NetError>;
