//! Error types for the meshcore-session library.

use thiserror::Error;

/// The main error type for session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Protocol error reported by the device.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Command timed out waiting for a correlated reply.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The transport dropped while frames were still expected.
    #[error("connection lost")]
    ConnectionLost,

    /// Cryptographic failure on a direct message.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid public key format.
    #[error("invalid public key: {reason}")]
    InvalidPublicKey { reason: String },

    /// Contact lookup failed.
    #[error("contact not found: {query}")]
    ContactNotFound { query: String },

    /// Caller-supplied input was rejected before hitting the wire.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Payload exceeds what a single frame can carry.
    #[error("data too large: {size} bytes exceeds maximum {max}")]
    DataTooLarge { size: usize, max: usize },
}

/// Frame-specific errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame payload exceeds maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Discriminated outcome of direct message decryption.
///
/// Crypto failures are terminal for the message in question: a payload
/// that failed its MAC must not be retried unchanged, and no partial
/// plaintext is ever surfaced.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Payload shorter than the minimum packet or structurally invalid.
    #[error("invalid payload")]
    InvalidPayload,

    /// Key material was malformed or unusable before any crypto ran.
    #[error("key error")]
    KeyError,

    /// The truncated MAC did not match; ciphertext was never decrypted.
    #[error("MAC mismatch")]
    MacMismatch,

    /// MAC matched but the plaintext failed structural validation.
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
