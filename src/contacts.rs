//! In-memory cache of known contacts.
//!
//! Contacts are keyed by the hex id derived from their public key.
//! Locally staged additions sit in a pending map until the device
//! confirms them. The dirty flag records that the cache diverged from
//! the device; it clears only when a full sync completes, and the
//! sync watermark lets the next sync request only newer records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::contact::Contact;

#[derive(Debug, Default)]
struct Inner {
    confirmed: HashMap<String, Contact>,
    pending: HashMap<String, Contact>,
    dirty: bool,
    watermark: u32,
}

/// Shared contact cache.
#[derive(Debug, Clone, Default)]
pub struct ContactCache {
    inner: Arc<Mutex<Inner>>,
}

impl ContactCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or updates a confirmed contact, last write wins.
    ///
    /// Used both for advertisement-driven updates and for records
    /// arriving during a sync. A pending entry under the same id is
    /// superseded.
    pub fn upsert(&self, contact: Contact) {
        let mut inner = self.lock();
        let id = contact.id();
        inner.pending.remove(&id);
        inner.confirmed.insert(id, contact);
        inner.dirty = true;
    }

    /// Stages a locally added contact awaiting device confirmation.
    pub fn stage_pending(&self, contact: Contact) {
        let mut inner = self.lock();
        let id = contact.id();
        if !inner.confirmed.contains_key(&id) {
            inner.pending.insert(id, contact);
            inner.dirty = true;
        }
    }

    /// Promotes a pending contact to confirmed.
    ///
    /// Returns false if no pending entry holds the id.
    pub fn confirm(&self, id: &str) -> bool {
        let mut inner = self.lock();
        match inner.pending.remove(id) {
            Some(contact) => {
                inner.confirmed.insert(id.to_owned(), contact);
                true
            }
            None => false,
        }
    }

    /// Removes a contact from both maps.
    pub fn remove(&self, id: &str) -> Option<Contact> {
        let mut inner = self.lock();
        let removed = inner.confirmed.remove(id).or_else(|| inner.pending.remove(id));
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    /// Looks up a confirmed contact by hex id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Contact> {
        self.lock().confirmed.get(id).cloned()
    }

    /// Finds a confirmed contact by name: exact match wins, otherwise
    /// the first case-insensitive substring match.
    #[must_use]
    pub fn find_by_name(&self, query: &str) -> Option<Contact> {
        let inner = self.lock();
        if let Some(contact) = inner.confirmed.values().find(|c| c.name == query) {
            return Some(contact.clone());
        }
        let query = query.to_lowercase();
        inner
            .confirmed
            .values()
            .find(|c| c.name.to_lowercase().contains(&query))
            .cloned()
    }

    /// Finds a confirmed contact whose key starts with the supplied
    /// prefix (exactly `prefix.len()` bytes are compared).
    #[must_use]
    pub fn find_by_prefix(&self, prefix: &[u8]) -> Option<Contact> {
        self.lock()
            .confirmed
            .values()
            .find(|c| c.public_key.matches_prefix(prefix))
            .cloned()
    }

    /// All confirmed contacts.
    #[must_use]
    pub fn all(&self) -> Vec<Contact> {
        self.lock().confirmed.values().cloned().collect()
    }

    /// Number of confirmed contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().confirmed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the cache has diverged since the last completed sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Flags the cache as diverged without touching any record.
    ///
    /// Used when the device reports a change it does not spell out,
    /// such as a routing-path update for a contact.
    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }

    /// Watermark to pass as the `since` bound of the next sync.
    #[must_use]
    pub fn watermark(&self) -> u32 {
        self.lock().watermark
    }

    /// Records a completed full sync: clears the dirty flag and
    /// advances the watermark.
    pub fn sync_completed(&self, last_modified: u32) {
        let mut inner = self.lock();
        inner.dirty = false;
        inner.watermark = inner.watermark.max(last_modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::contact::{ContactFlags, ContactType, PublicKey};
    use bytes::Bytes;

    fn contact(first_byte: u8, name: &str, last_modified: u32) -> Contact {
        let mut key = [0u8; 32];
        key[0] = first_byte;
        Contact {
            public_key: PublicKey::new(key),
            contact_type: ContactType::Chat,
            flags: ContactFlags::NONE,
            out_path_len: -1,
            out_path: Bytes::new(),
            name: name.into(),
            last_advert: 0,
            latitude: None,
            longitude: None,
            last_modified,
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let cache = ContactCache::new();
        cache.upsert(contact(1, "alice", 10));
        cache.upsert(contact(1, "alice-renamed", 20));

        assert_eq!(cache.len(), 1);
        let id = contact(1, "", 0).id();
        assert_eq!(cache.get(&id).unwrap().name, "alice-renamed");
    }

    #[test]
    fn pending_lifecycle() {
        let cache = ContactCache::new();
        let c = contact(2, "bob", 5);
        let id = c.id();

        cache.stage_pending(c);
        assert!(cache.get(&id).is_none());
        assert!(cache.confirm(&id));
        assert_eq!(cache.get(&id).unwrap().name, "bob");
        assert!(!cache.confirm(&id));
    }

    #[test]
    fn name_lookup_prefers_exact_match() {
        let cache = ContactCache::new();
        cache.upsert(contact(1, "Alf", 0));
        cache.upsert(contact(2, "Al", 0));

        assert_eq!(cache.find_by_name("Al").unwrap().name, "Al");
        assert_eq!(cache.find_by_name("alf").unwrap().name, "Alf");
        assert!(cache.find_by_name("zed").is_none());
    }

    #[test]
    fn prefix_lookup_compares_supplied_length() {
        let cache = ContactCache::new();
        cache.upsert(contact(0xAB, "carol", 0));

        assert!(cache.find_by_prefix(&[0xAB]).is_some());
        assert!(cache.find_by_prefix(&[0xAB, 0x00]).is_some());
        assert!(cache.find_by_prefix(&[0xAC]).is_none());
    }

    #[test]
    fn dirty_clears_only_on_completed_sync() {
        let cache = ContactCache::new();
        cache.upsert(contact(1, "alice", 100));
        assert!(cache.is_dirty());

        cache.sync_completed(100);
        assert!(!cache.is_dirty());
        assert_eq!(cache.watermark(), 100);

        cache.remove(&contact(1, "", 0).id());
        assert!(cache.is_dirty());

        // a stale watermark never moves the bound backwards
        cache.sync_completed(50);
        assert_eq!(cache.watermark(), 100);
    }

    #[test]
    fn mark_dirty_leaves_records_alone() {
        let cache = ContactCache::new();
        cache.upsert(contact(1, "alice", 100));
        cache.sync_completed(100);

        cache.mark_dirty();
        assert!(cache.is_dirty());
        assert_eq!(cache.len(), 1);
    }
}
