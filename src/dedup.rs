//! Duplicate suppression for fetched messages.
//!
//! Flood routing can deliver the same message several times. Each
//! conversation keeps a bounded FIFO window of message fingerprints;
//! a fingerprint still inside the window marks the message as a
//! duplicate. Eviction is strictly oldest-first, so an evicted
//! fingerprint can re-register later.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

/// Default window size for direct conversations.
pub const DEFAULT_DIRECT_CAPACITY: usize = 50;

/// Default window size for channel conversations.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Per-conversation window capacities.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub direct_capacity: usize,
    pub channel_capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            direct_capacity: DEFAULT_DIRECT_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Identifies one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    /// Direct conversation, keyed by the contact's hex id.
    Direct(String),
    /// Channel conversation, keyed by channel index.
    Channel(u8),
}

/// Computes a message fingerprint: the first 8 bytes of
/// SHA-256(timestamp LE, [sender name,] text).
#[must_use]
pub fn fingerprint(timestamp: u32, sender_name: Option<&str>, text: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    if let Some(name) = sender_name {
        hasher.update(name.as_bytes());
    }
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[derive(Debug, Default)]
struct Window {
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl Window {
    /// Check-then-register under one lock: returns true for a
    /// fingerprint already in the window, otherwise records it and
    /// evicts the oldest entry past capacity.
    fn check_and_register(&mut self, fp: u64, capacity: usize) -> bool {
        if self.seen.contains(&fp) {
            return true;
        }
        self.order.push_back(fp);
        self.seen.insert(fp);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        false
    }
}

/// Shared dedup cache over all conversations.
#[derive(Debug, Clone, Default)]
pub struct MessageDedupCache {
    config: DedupConfig,
    windows: Arc<Mutex<HashMap<ConversationKey, Window>>>,
}

impl MessageDedupCache {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns true if the fingerprint was already seen in this
    /// conversation; otherwise registers it.
    pub fn is_duplicate(&self, key: &ConversationKey, fp: u64) -> bool {
        let capacity = match key {
            ConversationKey::Direct(_) => self.config.direct_capacity,
            ConversationKey::Channel(_) => self.config.channel_capacity,
        };
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        windows
            .entry(key.clone())
            .or_default()
            .check_and_register(fp, capacity)
    }
}
