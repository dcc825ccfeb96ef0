//! Event triggers: fixed slots that other threads can fire.
//!
//! A trigger is one bit of a 32-bit mask. The scheduler thread owns the slot
//! table (allocation and handlers); the pending mask and each slot's context
//! live behind an `Arc` that [`TriggerHandle`] shares with other threads.
//!
//! Firing publishes in a fixed order: the context is stored first, then the
//! bit is set with `Release`. The scheduler swaps the mask to zero with
//! `Acquire` before reading contexts, so any bit it observes has its context
//! visible. A bit set after the swap stays in the mask for the next step.
//! Contexts are never cleared by servicing, only replaced by the next firing
//! or reset by create and delete.

use crate::poller::Notifier;
use crate::tracing_compat::{debug, trace, warn};
use core::fmt;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Number of trigger slots.
pub const MAX_EVENT_TRIGGERS: usize = 32;

const FIRST_SLOT_MASK: u32 = 0x8000_0000;

/// Data attached to a trigger firing.
pub type TriggerData = Arc<dyn Any + Send + Sync>;

/// A set of trigger bits.
///
/// Allocation hands out single bits; operations that take an id also accept
/// several ids or-ed together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventTriggerId(u32);

impl EventTriggerId {
    /// The empty set, returned when every slot is taken.
    pub const NONE: Self = Self(0);

    /// Wraps a raw mask.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true for [`EventTriggerId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Union of two ids.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    const fn for_slot(slot: usize) -> Self {
        Self(FIRST_SLOT_MASK >> slot)
    }

    fn slots(self) -> impl Iterator<Item = usize> {
        (0..MAX_EVENT_TRIGGERS).filter(move |&slot| self.0 & (FIRST_SLOT_MASK >> slot) != 0)
    }
}

impl fmt::Debug for EventTriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTriggerId({:#010x})", self.0)
    }
}

impl core::ops::BitOr for EventTriggerId {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

struct TriggerShared {
    pending: AtomicU32,
    contexts: [Mutex<Option<TriggerData>>; MAX_EVENT_TRIGGERS],
    notifier: Option<Notifier>,
}

impl TriggerShared {
    fn fire(&self, id: EventTriggerId, data: Option<TriggerData>) {
        for slot in id.slots() {
            *self.contexts[slot].lock() = data.clone();
        }
        self.pending.fetch_or(id.bits(), Ordering::Release);
        if let Some(notify) = &self.notifier {
            notify();
        }
    }
}

/// Cross-thread handle for firing triggers.
///
/// This is the only scheduler surface that is `Send + Sync`.
#[derive(Clone)]
pub struct TriggerHandle {
    shared: Arc<TriggerShared>,
}

impl TriggerHandle {
    /// Fires every trigger in `id`, attaching `data` to each.
    ///
    /// Repeated firings before the scheduler services the trigger coalesce;
    /// the last attached data wins.
    pub fn trigger_event(&self, id: EventTriggerId, data: Option<TriggerData>) {
        self.shared.fire(id, data);
    }
}

impl fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHandle")
            .field(
                "pending",
                &EventTriggerId(self.shared.pending.load(Ordering::Relaxed)),
            )
            .finish()
    }
}

enum Slot<H> {
    Free,
    /// `None` while the handler is out being dispatched.
    Allocated(Option<H>),
}

/// The scheduler thread's side of the trigger table.
pub struct TriggerBank<H> {
    slots: [Slot<H>; MAX_EVENT_TRIGGERS],
    last_used_slot: usize,
    shared: Arc<TriggerShared>,
}

impl<H> TriggerBank<H> {
    /// Creates a bank with every slot free. `notifier`, if given, is rung
    /// after each firing.
    #[must_use]
    pub fn new(notifier: Option<Notifier>) -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::Free),
            last_used_slot: MAX_EVENT_TRIGGERS - 1,
            shared: Arc::new(TriggerShared {
                pending: AtomicU32::new(0),
                contexts: std::array::from_fn(|_| Mutex::new(None)),
                notifier,
            }),
        }
    }

    /// Claims the first free slot after the last one allocated, wrapping.
    /// Returns [`EventTriggerId::NONE`] if all slots are taken.
    pub fn create(&mut self, handler: H) -> EventTriggerId {
        let mut slot = self.last_used_slot;
        for _ in 0..MAX_EVENT_TRIGGERS {
            slot = (slot + 1) % MAX_EVENT_TRIGGERS;
            if matches!(self.slots[slot], Slot::Free) {
                let id = EventTriggerId::for_slot(slot);
                // A stale id may have fired after its delete.
                self.shared.pending.fetch_and(!id.bits(), Ordering::AcqRel);
                self.slots[slot] = Slot::Allocated(Some(handler));
                *self.shared.contexts[slot].lock() = None;
                self.last_used_slot = slot;
                debug!(trigger = ?id, slot, "event trigger created");
                return id;
            }
        }
        warn!(capacity = MAX_EVENT_TRIGGERS, "event trigger slots exhausted");
        EventTriggerId::NONE
    }

    /// Frees every slot in `id` and discards any pending firing for it.
    pub fn delete(&mut self, id: EventTriggerId) {
        self.shared.pending.fetch_and(!id.bits(), Ordering::AcqRel);
        for slot in id.slots() {
            self.slots[slot] = Slot::Free;
            *self.shared.contexts[slot].lock() = None;
        }
        debug!(trigger = ?id, "event trigger deleted");
    }

    /// Fires from the scheduler thread.
    pub fn fire(&self, id: EventTriggerId, data: Option<TriggerData>) {
        self.shared.fire(id, data);
    }

    /// A cross-thread handle onto this bank.
    #[must_use]
    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns true if a firing is waiting to be serviced.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire) != 0
    }

    /// Returns true if the slot for `id` (a single bit) is allocated.
    #[must_use]
    pub fn is_allocated(&self, id: EventTriggerId) -> bool {
        let mut slots = id.slots();
        match (slots.next(), slots.next()) {
            (Some(slot), None) => matches!(self.slots[slot], Slot::Allocated(_)),
            _ => false,
        }
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Allocated(_)))
            .count()
    }

    /// Atomically takes the pending mask, leaving it empty.
    pub fn take_pending(&self) -> EventTriggerId {
        EventTriggerId(self.shared.pending.swap(0, Ordering::Acquire))
    }

    /// Splits a pending mask into `(trigger, context)` firings, in slot
    /// order.
    ///
    /// Contexts stay in their slots until the next firing replaces them or
    /// the trigger is deleted. A firing that lands between the mask swap and
    /// this read leaves its bit set with a live context for the next step.
    pub fn firings(&self, pending: EventTriggerId) -> Vec<(EventTriggerId, Option<TriggerData>)> {
        pending
            .slots()
            .map(|slot| {
                let data = self.shared.contexts[slot].lock().clone();
                (EventTriggerId::for_slot(slot), data)
            })
            .collect()
    }

    /// Takes the handler of a single-bit id out for dispatch.
    pub fn take_handler(&mut self, id: EventTriggerId) -> Option<H> {
        let slot = id.slots().next()?;
        match &mut self.slots[slot] {
            Slot::Allocated(handler) => handler.take(),
            Slot::Free => None,
        }
    }

    /// Returns a dispatched handler to its slot.
    ///
    /// Dropped if the trigger was deleted while running, or deleted and
    /// re-created with a new handler.
    pub fn restore_handler(&mut self, id: EventTriggerId, handler: H) {
        let Some(slot) = id.slots().next() else {
            return;
        };
        if let Slot::Allocated(empty @ None) = &mut self.slots[slot] {
            *empty = Some(handler);
        } else {
            trace!(trigger = ?id, "trigger changed during dispatch; handler dropped");
        }
    }
}

impl<H> fmt::Debug for TriggerBank<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerBank")
            .field("allocated", &self.allocated())
            .field("last_used_slot", &self.last_used_slot)
            .field(
                "pending",
                &EventTriggerId(self.shared.pending.load(Ordering::Relaxed)),
            )
            .finish()
    }
}
