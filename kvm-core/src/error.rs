//! Error kinds for the networking and coordination substrate.
//!
//! These map onto the error kinds in the design doc's error-handling
//! section: decode errors and chunk-reassembly errors are recovered
//! locally by the caller (logged and dropped); transport and handshake
//! errors are surfaced to the accept/dial loop that owns the connection;
//! registry errors are configuration-time and propagate to the caller of
//! `add_peer`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("chunk reassembly error: {0}")]
    ChunkReassembly(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("cursor guard error: {0}")]
    CursorGuard(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
