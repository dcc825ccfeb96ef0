//! Delta-encoded queue of timed entries.
//!
//! Entries sit on a circular doubly linked ring, threaded through an
//! [`Arena`], with one permanent sentinel node. Each entry stores the time
//! remaining *after its predecessor fires* rather than an absolute deadline:
//!
//! ```text
//!  sentinel ─▶ [B Δ100ms] ─▶ [C Δ200ms] ─▶ [A Δ200ms] ─▶ sentinel
//!  (ETERNITY)   fires +100     fires +300     fires +500
//! ```
//!
//! The deadline of an entry is the sum of deltas from the head through that
//! entry. Advancing the clock only touches the entries that became due plus
//! one more, and insertion keeps both the ordering and the sum in one pass.

use super::TaskToken;
use crate::time::{Clock, DelayInterval, EventTime};
use crate::tracing_compat::{error, trace, warn};
use crate::util::{Arena, ArenaIndex};
use std::fmt;
use std::sync::Arc;

/// A timed entry that is not (or no longer) linked into a queue.
///
/// Building one assigns its [`TaskToken`]; the token survives removal and
/// re-insertion, so [`DelayQueue::update_entry`] keeps the caller's handle
/// valid.
pub struct DelayQueueEntry<T> {
    token: TaskToken,
    delay: DelayInterval,
    payload: T,
}

impl<T> DelayQueueEntry<T> {
    /// Creates an entry due `delay` after it is added to a queue.
    pub fn new(delay: DelayInterval, payload: T) -> Self {
        Self {
            token: TaskToken::next(),
            delay,
            payload,
        }
    }

    /// The entry's identity.
    #[must_use]
    pub fn token(&self) -> TaskToken {
        self.token
    }

    /// Delay measured from the queue's last synchronization. For a freshly
    /// built entry this is the requested delay; for an entry taken out of a
    /// queue it is what was still outstanding.
    #[must_use]
    pub fn delay(&self) -> DelayInterval {
        self.delay
    }

    /// Replaces the delay used by the next [`DelayQueue::add_entry`].
    pub fn set_delay(&mut self, delay: DelayInterval) {
        self.delay = delay;
    }

    /// Borrows the payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consumes the entry, yielding the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T> fmt::Debug for DelayQueueEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueueEntry")
            .field("token", &self.token)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

struct Node<T> {
    delta: DelayInterval,
    /// `None` only for the sentinel.
    entry: Option<(TaskToken, T)>,
    prev: ArenaIndex,
    next: ArenaIndex,
}

/// Ordered, delta-encoded queue of pending timed entries.
pub struct DelayQueue<T> {
    nodes: Arena<Node<T>>,
    sentinel: ArenaIndex,
    last_sync_time: EventTime,
    clock: Arc<dyn Clock>,
}

impl<T> DelayQueue<T> {
    /// Creates an empty queue synchronized to `clock`'s current time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut nodes = Arena::new();
        let sentinel = nodes.insert_with(|idx| Node {
            delta: DelayInterval::ETERNITY,
            entry: None,
            prev: idx,
            next: idx,
        });
        let last_sync_time = clock.now();
        Self {
            nodes,
            sentinel,
            last_sync_time,
            clock,
        }
    }

    /// Number of linked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns true if no entries are linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The time the deltas were last reconciled against the clock.
    #[must_use]
    pub fn last_sync_time(&self) -> EventTime {
        self.last_sync_time
    }

    fn head(&self) -> ArenaIndex {
        self.nodes[self.sentinel].next
    }

    /// Links `entry` in deadline order and returns its token.
    ///
    /// Entries with equal deadlines fire in insertion order.
    pub fn add_entry(&mut self, entry: DelayQueueEntry<T>) -> TaskToken {
        self.synchronize();

        let DelayQueueEntry {
            token,
            delay: mut remaining,
            payload,
        } = entry;

        let mut cur = self.head();
        while cur != self.sentinel && self.nodes[cur].delta <= remaining {
            remaining -= self.nodes[cur].delta;
            cur = self.nodes[cur].next;
        }
        if cur != self.sentinel {
            self.nodes[cur].delta -= remaining;
        }

        let prev = self.nodes[cur].prev;
        let idx = self.nodes.insert(Node {
            delta: remaining,
            entry: Some((token, payload)),
            prev,
            next: cur,
        });
        self.nodes[prev].next = idx;
        self.nodes[cur].prev = idx;

        trace!(token = %token, delta_us = remaining.as_micros(), "delay queue entry added");
        token
    }

    /// Unlinks the entry with `token`. Unknown tokens, including those of
    /// entries that already fired, are a no-op.
    pub fn remove_entry(&mut self, token: TaskToken) -> Option<DelayQueueEntry<T>> {
        let (idx, remaining) = self.find_entry_by_token(token)?;
        let mut entry = self.unlink(idx)?;
        entry.delay = remaining;
        trace!(token = %token, "delay queue entry removed");
        Some(entry)
    }

    /// Moves the entry with `token` to fire `new_delay` from now. Returns
    /// false if no such entry is queued.
    pub fn update_entry(&mut self, token: TaskToken, new_delay: DelayInterval) -> bool {
        let Some(mut entry) = self.remove_entry(token) else {
            return false;
        };
        entry.delay = new_delay;
        self.add_entry(entry);
        true
    }

    /// Returns true if an entry with `token` is linked.
    #[must_use]
    pub fn contains(&self, token: TaskToken) -> bool {
        self.find_entry_by_token(token).is_some()
    }

    /// Time until the entry with `token` fires, as of the last sync.
    #[must_use]
    pub fn remaining(&self, token: TaskToken) -> Option<DelayInterval> {
        self.find_entry_by_token(token).map(|(_, remaining)| remaining)
    }

    /// Time until the head entry is due; [`DelayInterval::ETERNITY`] when
    /// empty.
    pub fn time_to_next_alarm(&mut self) -> DelayInterval {
        let head = self.head();
        if self.nodes[head].delta.is_zero() {
            return DelayInterval::ZERO;
        }
        self.synchronize();
        self.nodes[self.head()].delta
    }

    /// Unlinks and returns the head entry if it is due.
    ///
    /// The entry leaves the ring before the caller runs its payload, so the
    /// payload may add or remove entries freely.
    pub fn handle_alarm(&mut self) -> Option<DelayQueueEntry<T>> {
        if !self.nodes[self.head()].delta.is_zero() {
            self.synchronize();
        }
        let head = self.head();
        if head == self.sentinel || !self.nodes[head].delta.is_zero() {
            return None;
        }
        self.unlink(head)
    }

    /// Charges the time elapsed since the last sync against the head of the
    /// ring.
    pub fn synchronize(&mut self) {
        let now = self.clock.now();
        if now < self.last_sync_time {
            warn!(
                last_sync = ?self.last_sync_time,
                now = ?now,
                "clock moved backward; resetting delay queue sync time"
            );
            self.last_sync_time = now;
            return;
        }
        let mut elapsed = now - self.last_sync_time;
        self.last_sync_time = now;

        let mut cur = self.head();
        while cur != self.sentinel && elapsed >= self.nodes[cur].delta {
            elapsed -= self.nodes[cur].delta;
            self.nodes[cur].delta = DelayInterval::ZERO;
            cur = self.nodes[cur].next;
        }
        if cur != self.sentinel {
            self.nodes[cur].delta -= elapsed;
        }
    }

    /// Walks `(token, delta)` pairs from the head.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cur: self.head(),
        }
    }

    /// Drops every linked entry.
    pub fn clear(&mut self) {
        while self.head() != self.sentinel {
            let head = self.head();
            drop(self.unlink(head));
        }
    }

    fn find_entry_by_token(&self, token: TaskToken) -> Option<(ArenaIndex, DelayInterval)> {
        let mut remaining = DelayInterval::ZERO;
        let mut cur = self.head();
        while cur != self.sentinel {
            let node = &self.nodes[cur];
            remaining += node.delta;
            if matches!(node.entry, Some((t, _)) if t == token) {
                return Some((cur, remaining));
            }
            cur = node.next;
        }
        None
    }

    fn unlink(&mut self, idx: ArenaIndex) -> Option<DelayQueueEntry<T>> {
        if idx == self.sentinel {
            return None;
        }
        let removed = self.nodes.remove(idx);
        debug_assert!(removed.is_some(), "unlinking a dead delay queue node");
        let Some(node) = removed else {
            error!(index = ?idx, "unlinking a dead delay queue node");
            return None;
        };
        if node.next != self.sentinel {
            self.nodes[node.next].delta += node.delta;
        }
        self.nodes[node.prev].next = node.next;
        self.nodes[node.next].prev = node.prev;

        debug_assert!(node.entry.is_some(), "linked delay queue node has no entry");
        let Some((token, payload)) = node.entry else {
            error!(index = ?idx, "linked delay queue node has no entry");
            return None;
        };
        Some(DelayQueueEntry {
            token,
            delay: node.delta,
            payload,
        })
    }
}

impl<T> fmt::Debug for DelayQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueue")
            .field("len", &self.len())
            .field("last_sync_time", &self.last_sync_time)
            .field("entries", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over a [`DelayQueue`] in firing order.
pub struct Iter<'a, T> {
    queue: &'a DelayQueue<T>,
    cur: ArenaIndex,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = (TaskToken, DelayInterval);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.queue.sentinel {
            return None;
        }
        let node = &self.queue.nodes[self.cur];
        self.cur = node.next;
        node.entry.as_ref().map(|(token, _)| (*token, node.delta))
    }
}
