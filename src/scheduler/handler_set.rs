//! Registry of descriptor watches.
//!
//! A ring of [`HandlerDescriptor`]s threaded through an [`Arena`], headed by
//! a sentinel that is never a real watch. Lookups are linear; registries stay
//! small (tens of descriptors) and insertion and removal are O(1) splices.

use crate::poller::{Condition, DescriptorId};
use crate::tracing_compat::{debug, error};
use crate::util::{Arena, ArenaIndex};
use std::fmt;

/// Stable reference to a registry node, valid until that node is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey(ArenaIndex);

/// One registered watch.
pub struct HandlerDescriptor<H> {
    descriptor: DescriptorId,
    conditions: Condition,
    /// Empty while the handler is out being dispatched.
    handler: Option<H>,
    prev: ArenaIndex,
    next: ArenaIndex,
}

impl<H> HandlerDescriptor<H> {
    /// The watched descriptor.
    #[must_use]
    pub fn descriptor(&self) -> DescriptorId {
        self.descriptor
    }

    /// The conditions of interest.
    #[must_use]
    pub fn conditions(&self) -> Condition {
        self.conditions
    }

    /// The registered handler, unless it is currently running.
    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }
}

impl<H> fmt::Debug for HandlerDescriptor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("descriptor", &self.descriptor)
            .field("conditions", &self.conditions)
            .field("dispatching", &self.handler.is_none())
            .finish()
    }
}

/// Ring of descriptor watches with a sentinel head.
pub struct HandlerSet<H> {
    nodes: Arena<HandlerDescriptor<H>>,
    sentinel: ArenaIndex,
}

impl<H> Default for HandlerSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> HandlerSet<H> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let sentinel = nodes.insert_with(|idx| HandlerDescriptor {
            descriptor: DescriptorId(-1),
            conditions: Condition::NONE,
            handler: None,
            prev: idx,
            next: idx,
        });
        Self { nodes, sentinel }
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `handler` for `descriptor`, replacing the conditions and
    /// handler of an existing registration in place.
    pub fn assign_handler(&mut self, descriptor: DescriptorId, conditions: Condition, handler: H) {
        if let Some(key) = self.lookup_key(descriptor) {
            let node = &mut self.nodes[key.0];
            node.conditions = conditions;
            node.handler = Some(handler);
            debug!(descriptor = %descriptor, conditions = ?conditions, "handler updated");
            return;
        }

        let prev = self.sentinel;
        let next = self.nodes[prev].next;
        let idx = self.nodes.insert(HandlerDescriptor {
            descriptor,
            conditions,
            handler: Some(handler),
            prev,
            next,
        });
        self.nodes[prev].next = idx;
        self.nodes[next].prev = idx;
        debug!(descriptor = %descriptor, conditions = ?conditions, "handler assigned");
    }

    /// Removes the registration for `descriptor`. Returns false if there was
    /// none.
    pub fn clear_handler(&mut self, descriptor: DescriptorId) -> bool {
        let Some(key) = self.lookup_key(descriptor) else {
            return false;
        };
        let removed = self.nodes.remove(key.0);
        debug_assert!(removed.is_some(), "registered handler node missing from arena");
        let Some(node) = removed else {
            error!(descriptor = %descriptor, "registered handler node missing from arena");
            return false;
        };
        self.nodes[node.prev].next = node.next;
        self.nodes[node.next].prev = node.prev;
        debug!(descriptor = %descriptor, "handler cleared");
        true
    }

    /// Renumbers a registration without touching its position in the ring.
    /// Returns false if `old` is not registered.
    pub fn move_handler(&mut self, old: DescriptorId, new: DescriptorId) -> bool {
        let Some(key) = self.lookup_key(old) else {
            return false;
        };
        self.nodes[key.0].descriptor = new;
        debug!(old = %old, new = %new, "handler moved");
        true
    }

    /// Finds the registration for `descriptor`.
    #[must_use]
    pub fn lookup(&self, descriptor: DescriptorId) -> Option<&HandlerDescriptor<H>> {
        self.lookup_key(descriptor).map(|key| &self.nodes[key.0])
    }

    /// Finds the key of the registration for `descriptor`.
    #[must_use]
    pub fn lookup_key(&self, descriptor: DescriptorId) -> Option<HandlerKey> {
        let mut cursor = self.cursor();
        while let Some(key) = cursor.next(self) {
            if self.nodes[key.0].descriptor == descriptor {
                return Some(key);
            }
        }
        None
    }

    /// Resolves a key to its registration, if still registered.
    #[must_use]
    pub fn get(&self, key: HandlerKey) -> Option<&HandlerDescriptor<H>> {
        if key.0 == self.sentinel {
            return None;
        }
        self.nodes.get(key.0)
    }

    /// Takes the handler out of its node for dispatch. The node stays
    /// registered.
    pub fn take_handler(&mut self, key: HandlerKey) -> Option<H> {
        if key.0 == self.sentinel {
            return None;
        }
        self.nodes.get_mut(key.0)?.handler.take()
    }

    /// Puts a dispatched handler back.
    ///
    /// The handler is dropped if its registration was cleared meanwhile, or
    /// if a new handler was assigned to the same node while it ran.
    pub fn restore_handler(&mut self, key: HandlerKey, handler: H) {
        if key.0 == self.sentinel {
            return;
        }
        if let Some(node) = self.nodes.get_mut(key.0) {
            if node.handler.is_none() {
                node.handler = Some(handler);
            }
        }
    }

    /// A cursor positioned before the first registration.
    #[must_use]
    pub fn cursor(&self) -> HandlerCursor {
        HandlerCursor {
            next: self.nodes[self.sentinel].next,
        }
    }

    /// Keys of all registrations, newest first.
    pub fn keys(&self) -> impl Iterator<Item = HandlerKey> + '_ {
        let mut cursor = self.cursor();
        std::iter::from_fn(move || cursor.next(self))
    }

    /// Borrowing iterator over all registrations.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerDescriptor<H>> + '_ {
        let mut cursor = self.cursor();
        std::iter::from_fn(move || cursor.next(self).map(|key| &self.nodes[key.0]))
    }
}

impl<H> fmt::Debug for HandlerSet<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Walks a [`HandlerSet`] without borrowing it between steps.
///
/// The cursor records the successor of the element it returns before handing
/// it out, so the caller may clear that element (or run a callback that does)
/// and keep walking. If the recorded successor itself disappears, the walk
/// ends instead of following a dead link.
#[derive(Debug, Clone, Copy)]
pub struct HandlerCursor {
    next: ArenaIndex,
}

impl HandlerCursor {
    /// Advances to the next registration.
    pub fn next<H>(&mut self, set: &HandlerSet<H>) -> Option<HandlerKey> {
        if self.next == set.sentinel {
            return None;
        }
        let Some(node) = set.nodes.get(self.next) else {
            self.next = set.sentinel;
            return None;
        };
        let current = self.next;
        self.next = node.next;
        Some(HandlerKey(current))
    }
}
