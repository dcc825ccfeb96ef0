//! Generation-checked slot storage.
//!
//! The delay queue and handler registry link their nodes through
//! [`ArenaIndex`] values instead of pointers. A removed slot bumps its
//! generation before it is reused, so an index kept past removal resolves to
//! `None` rather than to whichever node took the slot next.

use core::fmt;

/// Stable handle to an arena slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Slot position.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Vec-backed storage with a free list and per-slot generations.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value`, reusing a vacant slot when one exists.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant {
                next_free,
                generation,
            } = *slot
            else {
                unreachable!("free list pointed to occupied slot");
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { value, generation };
            return ArenaIndex { index, generation };
        }

        let index = u32::try_from(self.slots.len()).expect("arena overflow");
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        ArenaIndex {
            index,
            generation: 0,
        }
    }

    /// Stores the value built by `f`, which receives the index it will live
    /// at. Lets a ring node point at itself on creation.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        let idx = match self.free_head {
            Some(index) => {
                let Slot::Vacant { generation, .. } = self.slots[index as usize] else {
                    unreachable!("free list pointed to occupied slot");
                };
                ArenaIndex { index, generation }
            }
            None => ArenaIndex {
                index: u32::try_from(self.slots.len()).expect("arena overflow"),
                generation: 0,
            },
        };
        let inserted = self.insert(f(idx));
        debug_assert_eq!(inserted, idx);
        inserted
    }

    /// Removes and returns the value at `idx` if the handle is still live.
    pub fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == idx.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            next_free: self.free_head,
            generation: idx.generation.wrapping_add(1),
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            unreachable!("slot checked occupied above");
        };
        self.free_head = Some(idx.index);
        self.len -= 1;
        Some(value)
    }

    /// Shared access to a live slot.
    #[must_use]
    pub fn get(&self, idx: ArenaIndex) -> Option<&T> {
        match self.slots.get(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable access to a live slot.
    pub fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true if `idx` still names a stored value.
    #[must_use]
    pub fn contains(&self, idx: ArenaIndex) -> bool {
        self.get(idx).is_some()
    }
}

impl<T> core::ops::Index<ArenaIndex> for Arena<T> {
    type Output = T;

    fn index(&self, idx: ArenaIndex) -> &T {
        self.get(idx).expect("stale arena index")
    }
}

impl<T> core::ops::IndexMut<ArenaIndex> for Arena<T> {
    fn index_mut(&mut self, idx: ArenaIndex) -> &mut T {
        self.get_mut(idx).expect("stale arena index")
    }
}
