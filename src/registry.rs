//! Pending request registry: correlates outbound commands with the
//! frames that answer them.
//!
//! Every entry is keyed by an opaque tag and optionally by a
//! (key-prefix, request-kind) pair for binary replies that carry no
//! tag. An entry fires exactly once, by whichever of a matching
//! completion, its timeout, or an explicit cancel happens first;
//! later firings are no-ops. All registry state lives behind a single
//! mutex that is never held across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::command::BinaryReqKind;
use crate::protocol::packet::PacketCode;

/// Secondary index key for binary replies.
pub type BinaryKey = ([u8; 6], BinaryReqKind);

/// How many early completions are held for late registrants.
const EARLY_COMPLETION_CAP: usize = 32;

#[derive(Debug)]
struct Entry {
    expects: Vec<PacketCode>,
    binary: Option<BinaryKey>,
    deadline: Instant,
    seq: u64,
    sender: oneshot::Sender<Event>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u32, Entry>,
    binary_index: HashMap<BinaryKey, u32>,
    next_seq: u64,
    // completions that beat their registration (ACK codes are only
    // known once MsgSent arrives, so the ACK itself can win the race)
    early: HashMap<u32, Event>,
    early_order: VecDeque<u32>,
}

impl Inner {
    /// Removes an entry from both indices, returning its completion slot.
    fn retire(&mut self, tag: u32) -> Option<oneshot::Sender<Event>> {
        let entry = self.entries.remove(&tag)?;
        if let Some(key) = entry.binary {
            self.binary_index.remove(&key);
        }
        Some(entry.sender)
    }
}

/// Shared table of in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl RequestRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned registry mutex means a panic mid-update; state
        // is append-only maps, safe to keep using
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a pending request and returns the handle to await.
    ///
    /// `expects` lists the response codes that may complete this entry
    /// via [`RequestRegistry::complete_response`]. A previous live
    /// entry under the same tag or binary key is displaced (its waiter
    /// sees the channel close).
    #[must_use]
    pub fn register(
        &self,
        tag: u32,
        expects: Vec<PacketCode>,
        binary: Option<BinaryKey>,
        timeout: Duration,
    ) -> PendingReply {
        let (sender, receiver) = oneshot::channel();
        {
            let mut inner = self.lock();
            if let Some(event) = inner.early.remove(&tag) {
                inner.early_order.retain(|&t| t != tag);
                let _ = sender.send(event);
                return PendingReply {
                    tag,
                    receiver,
                    timeout,
                    registry: self.clone(),
                };
            }
            if inner.entries.contains_key(&tag) {
                drop(inner.retire(tag));
            }
            if let Some(key) = binary {
                if let Some(&old_tag) = inner.binary_index.get(&key) {
                    drop(inner.retire(old_tag));
                }
                inner.binary_index.insert(key, tag);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(
                tag,
                Entry {
                    expects,
                    binary,
                    deadline: Instant::now() + timeout,
                    seq,
                    sender,
                },
            );
        }
        tracing::trace!(tag, ?timeout, "registered pending request");
        PendingReply {
            tag,
            receiver,
            timeout,
            registry: self.clone(),
        }
    }

    /// Completes the entry registered under `tag`.
    ///
    /// Returns false if no live entry holds the tag.
    pub fn complete(&self, tag: u32, event: Event) -> bool {
        let sender = self.lock().retire(tag);
        match sender {
            Some(sender) => {
                let _ = sender.send(event);
                true
            }
            None => false,
        }
    }

    /// Completes the entry registered under `tag`, or stashes the
    /// event for a registrant that has not arrived yet.
    ///
    /// Returns true if a live entry was completed directly.
    pub fn complete_or_stash(&self, tag: u32, event: Event) -> bool {
        let mut inner = self.lock();
        if let Some(sender) = inner.retire(tag) {
            drop(inner);
            let _ = sender.send(event);
            return true;
        }
        if inner.early.insert(tag, event).is_none() {
            inner.early_order.push_back(tag);
            while inner.early_order.len() > EARLY_COMPLETION_CAP {
                if let Some(old) = inner.early_order.pop_front() {
                    inner.early.remove(&old);
                }
            }
        }
        false
    }

    /// Completes the oldest entry expecting the given response code.
    ///
    /// Responses carry no tag on the wire, so ordering is the
    /// correlation: firmware answers commands in submission order.
    pub fn complete_response(&self, code: PacketCode, event: Event) -> bool {
        let sender = {
            let mut inner = self.lock();
            let tag = inner
                .entries
                .iter()
                .filter(|(_, e)| e.expects.contains(&code))
                .min_by_key(|(_, e)| e.seq)
                .map(|(&tag, _)| tag);
            tag.and_then(|tag| inner.retire(tag))
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(event);
                true
            }
            None => false,
        }
    }

    /// Completes the entry registered under a (key-prefix, kind) pair.
    pub fn complete_binary(&self, key_prefix: [u8; 6], kind: BinaryReqKind, event: Event) -> bool {
        let sender = {
            let mut inner = self.lock();
            let tag = inner.binary_index.get(&(key_prefix, kind)).copied();
            tag.and_then(|tag| inner.retire(tag))
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(event);
                true
            }
            None => false,
        }
    }

    /// Cancels a pending request; the waiter observes a timeout.
    pub fn cancel(&self, tag: u32) -> bool {
        self.lock().retire(tag).is_some()
    }

    /// Drops every entry whose deadline has passed.
    ///
    /// Waiters of dropped entries observe a timeout. Returns how many
    /// entries were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<u32> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(&tag, _)| tag)
            .collect();
        for tag in &expired {
            drop(inner.retire(*tag));
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "dropped expired pending requests");
        }
        expired.len()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to one in-flight request.
#[derive(Debug)]
pub struct PendingReply {
    tag: u32,
    receiver: oneshot::Receiver<Event>,
    timeout: Duration,
    registry: RequestRegistry,
}

impl PendingReply {
    /// The tag this request was registered under.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// Waits for the completion, timeout, or cancellation of this
    /// request.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` when the deadline elapses or the entry was
    /// cancelled before completing.
    pub async fn wait(self) -> Result<Event> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.timeout, self.receiver).await {
            Ok(Ok(event)) => Ok(event),
            // sender dropped: cancelled or cleaned up
            Ok(Err(_)) => Err(Error::Timeout { timeout_ms }),
            Err(_) => {
                self.registry.cancel(self.tag);
                Err(Error::Timeout { timeout_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn complete_resolves_waiter() {
        let registry = RequestRegistry::new();
        let reply = registry.register(7, vec![], None, SHORT);

        assert!(registry.complete(7, Event::Ok));
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn completion_fires_exactly_once() {
        let registry = RequestRegistry::new();
        let reply = registry.register(7, vec![], None, SHORT);

        assert!(registry.complete(7, Event::Ok));
        assert!(!registry.complete(7, Event::MessagesWaiting));
        assert!(!registry.cancel(7));
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retires_the_entry() {
        let registry = RequestRegistry::new();
        let reply = registry.register(7, vec![], None, SHORT);

        let result = reply.wait().await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 100 })));
        assert!(registry.is_empty());
        // a completion arriving after the timeout finds nothing
        assert!(!registry.complete(7, Event::Ok));
    }

    #[tokio::test]
    async fn cancel_surfaces_as_timeout() {
        let registry = RequestRegistry::new();
        let reply = registry.register(7, vec![], None, Duration::from_secs(60));

        assert!(registry.cancel(7));
        assert!(matches!(reply.wait().await, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn response_code_completes_oldest_first() {
        let registry = RequestRegistry::new();
        let first = registry.register(1, vec![PacketCode::CurrentTime], None, SHORT);
        let second = registry.register(2, vec![PacketCode::CurrentTime], None, SHORT);

        assert!(registry.complete_response(PacketCode::CurrentTime, Event::CurrentTime(10)));
        assert!(registry.complete_response(PacketCode::CurrentTime, Event::CurrentTime(20)));

        assert!(matches!(first.wait().await, Ok(Event::CurrentTime(10))));
        assert!(matches!(second.wait().await, Ok(Event::CurrentTime(20))));
    }

    #[tokio::test]
    async fn response_code_only_matches_expectations() {
        let registry = RequestRegistry::new();
        let reply = registry.register(1, vec![PacketCode::Battery], None, SHORT);

        assert!(!registry.complete_response(PacketCode::CurrentTime, Event::CurrentTime(10)));
        assert!(registry.complete_response(
            PacketCode::Battery,
            Event::Battery(crate::types::BatteryStatus {
                millivolts: 3700,
                used_kb: None,
                total_kb: None,
            })
        ));
        assert!(matches!(reply.wait().await, Ok(Event::Battery(_))));
    }

    #[tokio::test]
    async fn binary_index_routes_and_clears() {
        let registry = RequestRegistry::new();
        let prefix = [1, 2, 3, 4, 5, 6];
        let reply = registry.register(
            9,
            vec![],
            Some((prefix, BinaryReqKind::Telemetry)),
            SHORT,
        );

        // wrong kind does not fire
        assert!(!registry.complete_binary(prefix, BinaryReqKind::Status, Event::Ok));
        assert!(registry.complete_binary(prefix, BinaryReqKind::Telemetry, Event::Ok));
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));

        // both indices are cleared
        assert!(registry.is_empty());
        assert!(!registry.complete_binary(prefix, BinaryReqKind::Telemetry, Event::Ok));
    }

    #[tokio::test]
    async fn completing_by_tag_clears_binary_index() {
        let registry = RequestRegistry::new();
        let prefix = [1, 2, 3, 4, 5, 6];
        let reply = registry.register(
            9,
            vec![],
            Some((prefix, BinaryReqKind::Status)),
            SHORT,
        );

        assert!(registry.complete(9, Event::Ok));
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));
        assert!(!registry.complete_binary(prefix, BinaryReqKind::Status, Event::Ok));
    }

    #[tokio::test]
    async fn early_completion_fires_a_late_registration() {
        let registry = RequestRegistry::new();

        // the completion lands before anyone registered the tag
        assert!(!registry.complete_or_stash(0xBEEF, Event::Ok));

        let reply = registry.register(0xBEEF, vec![], None, SHORT);
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stash_is_bounded() {
        let registry = RequestRegistry::new();
        for tag in 0..40u32 {
            assert!(!registry.complete_or_stash(tag, Event::Ok));
        }

        // the oldest stashed completion was evicted, recent ones held
        let reply = registry.register(0, vec![], None, SHORT);
        assert!(matches!(reply.wait().await, Err(Error::Timeout { .. })));
        let reply = registry.register(39, vec![], None, SHORT);
        assert!(matches!(reply.wait().await, Ok(Event::Ok)));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_only_expired_entries() {
        let registry = RequestRegistry::new();
        let expired = registry.register(1, vec![], None, Duration::from_millis(10));
        let alive = registry.register(2, vec![], None, Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(registry.cleanup_expired(), 1);
        assert_eq!(registry.len(), 1);

        assert!(matches!(expired.wait().await, Err(Error::Timeout { .. })));
        assert!(registry.complete(2, Event::Ok));
        assert!(matches!(alive.wait().await, Ok(Event::Ok)));
    }
}
