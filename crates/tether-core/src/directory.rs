//! Linked instance directory
//!
//! An arena of records addressed by generational [`Handle`]s, with an
//! intrusive doubly-linked list threaded through the slots. The list holds
//! every live wrapped instance and is what global sweeps walk (weak-pointer
//! update after a collection, shutdown).
//!
//! Membership in the arena and membership in the list are separate: a record
//! stays addressable after it is unlinked (e.g. once its native object is
//! disposed) until it is explicitly removed.
//!
//! Sweeps never mutate the list while walking it. [`Directory::snapshot`]
//! copies the handles first, and [`Directory::unlink_where`] unlinks its
//! matches and hands them back so the caller acts on them in a second pass.

use std::fmt;

/// Stable handle to a directory slot
///
/// The generation makes a handle to a freed-and-reused slot detectable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Pack into a single word (used as an opaque tag)
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack a word produced by [`Handle::to_bits`]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Link {
    prev: Option<Handle>,
    next: Option<Handle>,
    linked: bool,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
    link: Link,
}

/// Arena plus intrusive list of live records
pub struct Directory<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<Handle>,
    linked: usize,
    occupied: usize,
}

impl<T> Directory<T> {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            linked: 0,
            occupied: 0,
        }
    }

    /// Store a record; it is not linked yet
    pub fn insert(&mut self, value: T) -> Handle {
        self.occupied += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.link = Link::default();
            return Handle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
            link: Link::default(),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    /// Unlink (if needed) and free a record
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        self.unlink(handle);

        let slot = &mut self.slots[handle.index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.occupied -= 1;
        value
    }

    /// Check whether a handle still refers to a stored record
    pub fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    /// Borrow a record
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slot(handle).and_then(|s| s.value.as_ref())
    }

    /// Mutably borrow a record
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slot_mut(handle).and_then(|s| s.value.as_mut())
    }

    /// Prepend a record to the list. O(1); linking twice is a no-op.
    pub fn link(&mut self, handle: Handle) {
        let old_head = self.head;
        let Some(slot) = self.slot_mut(handle) else {
            return;
        };
        if slot.link.linked {
            return;
        }
        slot.link = Link {
            prev: None,
            next: old_head,
            linked: true,
        };

        if let Some(old) = old_head {
            if let Some(old_slot) = self.slot_mut(old) {
                old_slot.link.prev = Some(handle);
            }
        }
        self.head = Some(handle);
        self.linked += 1;
    }

    /// Remove a record from the list. O(1); unlinking twice is a no-op.
    pub fn unlink(&mut self, handle: Handle) {
        let Some(slot) = self.slot_mut(handle) else {
            return;
        };
        if !slot.link.linked {
            return;
        }
        let Link { prev, next, .. } = std::mem::take(&mut slot.link);

        match prev {
            Some(p) => {
                if let Some(prev_slot) = self.slot_mut(p) {
                    prev_slot.link.next = next;
                }
            }
            None => self.head = next,
        }
        if let Some(n) = next {
            if let Some(next_slot) = self.slot_mut(n) {
                next_slot.link.prev = prev;
            }
        }
        self.linked -= 1;
    }

    /// Whether a record is currently linked
    pub fn is_linked(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.link.linked)
    }

    /// Handles of all linked records, head first
    pub fn snapshot(&self) -> Vec<Handle> {
        let mut handles = Vec::with_capacity(self.linked);
        let mut cursor = self.head;
        while let Some(handle) = cursor {
            handles.push(handle);
            cursor = self.slot(handle).and_then(|s| s.link.next);
        }
        handles
    }

    /// Visit a snapshot of the list; the visitor may unlink or remove any record.
    ///
    /// Records unlinked by an earlier visit are skipped.
    pub fn for_each_snapshot(&mut self, mut visitor: impl FnMut(&mut Self, Handle)) {
        for handle in self.snapshot() {
            if self.is_linked(handle) {
                visitor(self, handle);
            }
        }
    }

    /// First pass of a two-phase sweep: unlink every record matching
    /// `predicate` and return the matches for the caller to act on.
    pub fn unlink_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<Handle> {
        let mut removed = Vec::new();
        self.for_each_snapshot(|dir, handle| {
            if dir.get(handle).is_some_and(&mut predicate) {
                dir.unlink(handle);
                removed.push(handle);
            }
        });
        removed
    }

    /// Number of linked records
    pub fn linked_len(&self) -> usize {
        self.linked
    }

    /// Number of stored records, linked or not
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Check if no records are stored
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.value.is_some())
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.value.is_some())
    }
}

impl<T> Default for Directory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Directory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("len", &self.occupied)
            .field("linked", &self.linked)
            .finish()
    }
}
