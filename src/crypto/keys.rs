//! Derivation of 16-byte channel secrets and flood scope keys.
//!
//! Both derive from SHA-256 over the UTF-8 name, truncated to 16
//! bytes, but over distinct preimages so a channel named "ops" and a
//! flood scope named "ops" never share key material.

use sha2::{Digest, Sha256};

/// Length of channel secrets and flood scope keys.
pub const DERIVED_KEY_LEN: usize = 16;

/// The all-zero scope key that disables flood scoping.
pub const DISABLED_FLOOD_SCOPE: [u8; DERIVED_KEY_LEN] = [0u8; DERIVED_KEY_LEN];

/// Domain separator prepended to flood scope preimages.
const FLOOD_SCOPE_DOMAIN: &[u8] = b"floodscope:";

fn truncated_sha256(parts: &[&[u8]]) -> [u8; DERIVED_KEY_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut key = [0u8; DERIVED_KEY_LEN];
    key.copy_from_slice(&digest[..DERIVED_KEY_LEN]);
    key
}

/// Derives a channel secret from its name.
#[must_use]
pub fn derive_channel_secret(name: &str) -> [u8; DERIVED_KEY_LEN] {
    truncated_sha256(&[name.as_bytes()])
}

/// Derives a flood scope key from a topic name.
#[must_use]
pub fn derive_flood_scope_key(topic: &str) -> [u8; DERIVED_KEY_LEN] {
    truncated_sha256(&[FLOOD_SCOPE_DOMAIN, topic.as_bytes()])
}

/// Normalizes caller-supplied key material to exactly 16 bytes,
/// zero-padding or truncating as needed.
#[must_use]
pub fn explicit_secret(bytes: &[u8]) -> [u8; DERIVED_KEY_LEN] {
    let mut key = [0u8; DERIVED_KEY_LEN];
    let len = bytes.len().min(DERIVED_KEY_LEN);
    key[..len].copy_from_slice(&bytes[..len]);
    key
}
