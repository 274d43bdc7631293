//! End-to-end crypto for direct messages.
//!
//! Wire layout of an encrypted direct message:
//!
//! ```text
//! [dest_hash:1] [src_hash:1] [mac:2] [ciphertext:16n, n >= 1]
//! ```
//!
//! The hashes are the first byte of the respective public keys. The
//! MAC is the first two bytes of HMAC-SHA256 keyed with the X25519
//! shared secret, computed over the ciphertext only. Decryption is
//! AES-128-ECB keyed with the first 16 bytes of the shared secret,
//! performed only after the MAC verifies. Plaintext:
//!
//! ```text
//! [timestamp:4 LE] [type_attempt:1] [text...] [zero padding]
//! ```
//!
//! Failures are discriminated ([`CryptoError`]) and never yield
//! partial plaintext.

pub mod keys;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Truncated MAC length.
pub const MAC_LEN: usize = 2;
/// Destination + source hash bytes.
pub const HEADER_LEN: usize = 2;
/// Timestamp length inside the plaintext.
pub const TIMESTAMP_LEN: usize = 4;
/// Type/attempt byte length inside the plaintext.
pub const TYPE_LEN: usize = 1;
/// Cipher block size; ciphertext is always a multiple of this.
pub const BLOCK_LEN: usize = 16;
/// Minimum ciphertext length (one block).
pub const MIN_CIPHERTEXT_LEN: usize = BLOCK_LEN;
/// Minimum total packet length.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + MAC_LEN + MIN_CIPHERTEXT_LEN;

/// A successfully decrypted direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedDirectMessage {
    /// Sender's timestamp (Unix seconds).
    pub timestamp: u32,
    /// Combined message-type / attempt-counter byte.
    pub type_attempt: u8,
    /// Message text, zero padding stripped.
    pub text: String,
}

fn key_bytes(key: &[u8]) -> Result<[u8; 32], CryptoError> {
    key.try_into().map_err(|_| CryptoError::KeyError)
}

/// Computes the X25519 shared secret, rejecting the all-zero output
/// produced by low-order public keys.
fn shared_secret(my_private: &[u8], their_public: &[u8]) -> Result<[u8; 32], CryptoError> {
    let secret = StaticSecret::from(key_bytes(my_private)?);
    let public = X25519PublicKey::from(key_bytes(their_public)?);
    let shared = secret.diffie_hellman(&public).to_bytes();
    if shared == [0u8; 32] {
        return Err(CryptoError::KeyError);
    }
    Ok(shared)
}

fn truncated_mac(shared: &[u8; 32], ciphertext: &[u8]) -> Result<[u8; MAC_LEN], CryptoError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(shared).map_err(|_| CryptoError::KeyError)?;
    mac.update(ciphertext);
    let digest = mac.finalize().into_bytes();
    let mut truncated = [0u8; MAC_LEN];
    truncated.copy_from_slice(&digest[..MAC_LEN]);
    Ok(truncated)
}

fn cipher_for(shared: &[u8; 32]) -> Aes128 {
    Aes128::new(GenericArray::from_slice(&shared[..BLOCK_LEN]))
}

fn decrypt_blocks(shared: &[u8; 32], ciphertext: &[u8]) -> Vec<u8> {
    let cipher = cipher_for(shared);
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks_exact(BLOCK_LEN) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        plaintext.extend_from_slice(&block);
    }
    plaintext
}

fn encrypt_blocks(shared: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = cipher_for(shared);
    let mut ciphertext = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks_exact(BLOCK_LEN) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        ciphertext.extend_from_slice(&block);
    }
    ciphertext
}

/// Validates the packet structure and returns the ciphertext region
/// alongside the claimed MAC.
fn split_packet(payload: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    if payload.len() < MIN_PACKET_LEN {
        return Err(CryptoError::InvalidPayload);
    }
    let mac = &payload[HEADER_LEN..HEADER_LEN + MAC_LEN];
    let ciphertext = &payload[HEADER_LEN + MAC_LEN..];
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidPayload);
    }
    Ok((mac, ciphertext))
}

/// MAC-verifies and decrypts one direct message packet.
///
/// The MAC is checked before any decryption; a mismatch means the
/// ciphertext was never fed to the cipher.
///
/// # Errors
///
/// `InvalidPayload` for structural violations, `KeyError` for bad key
/// material, `MacMismatch` when authentication fails, and
/// `DecryptionFailed` when the authenticated plaintext is not valid.
pub fn decrypt_direct(
    payload: &[u8],
    my_private: &[u8],
    sender_public: &[u8],
) -> Result<DecryptedDirectMessage, CryptoError> {
    let (mac, ciphertext) = split_packet(payload)?;
    let shared = shared_secret(my_private, sender_public)?;

    let expected = truncated_mac(&shared, ciphertext)?;
    if expected != mac {
        return Err(CryptoError::MacMismatch);
    }

    let plaintext = decrypt_blocks(&shared, ciphertext);
    parse_plaintext(&plaintext)
}

fn parse_plaintext(plaintext: &[u8]) -> Result<DecryptedDirectMessage, CryptoError> {
    if plaintext.len() < TIMESTAMP_LEN + TYPE_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let timestamp = u32::from_le_bytes([plaintext[0], plaintext[1], plaintext[2], plaintext[3]]);
    let type_attempt = plaintext[TIMESTAMP_LEN];

    // the final block is zero-padded; NUL is not valid message text
    let text_region = &plaintext[TIMESTAMP_LEN + TYPE_LEN..];
    let text_end = text_region
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&text_region[..text_end])
        .map_err(|_| CryptoError::DecryptionFailed)?
        .to_owned();

    Ok(DecryptedDirectMessage {
        timestamp,
        type_attempt,
        text,
    })
}

/// Encrypts a direct message for `recipient_public`.
///
/// Produces the packet layout [`decrypt_direct`] consumes, zero-padding
/// the final plaintext block.
///
/// # Errors
///
/// `KeyError` for malformed key material.
pub fn encrypt_direct(
    timestamp: u32,
    type_attempt: u8,
    text: &str,
    my_private: &[u8],
    recipient_public: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let my_private = key_bytes(my_private)?;
    let recipient = key_bytes(recipient_public)?;
    let shared = shared_secret(&my_private, &recipient)?;

    let mut plaintext = Vec::with_capacity(TIMESTAMP_LEN + TYPE_LEN + text.len());
    plaintext.extend_from_slice(&timestamp.to_le_bytes());
    plaintext.push(type_attempt);
    plaintext.extend_from_slice(text.as_bytes());
    let padded_len = plaintext.len().div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN;
    plaintext.resize(padded_len, 0);

    let ciphertext = encrypt_blocks(&shared, &plaintext);
    let mac = truncated_mac(&shared, &ciphertext)?;

    let my_public = X25519PublicKey::from(&StaticSecret::from(my_private));
    let mut packet = Vec::with_capacity(HEADER_LEN + MAC_LEN + ciphertext.len());
    packet.push(recipient[0]);
    packet.push(my_public.as_bytes()[0]);
    packet.extend_from_slice(&mac);
    packet.extend_from_slice(&ciphertext);
    Ok(packet)
}

/// Runs the full verify-and-decrypt pipeline but surfaces only the
/// timestamp; any failure yields `None`.
#[must_use]
pub fn extract_timestamp(payload: &[u8], my_private: &[u8], sender_public: &[u8]) -> Option<u32> {
    decrypt_direct(payload, my_private, sender_public)
        .ok()
        .map(|m| m.timestamp)
}
