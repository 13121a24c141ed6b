//! # Reordering between decompression and parsing
//!
//! Decompression finishes out of order across worker threads, while parsing must
//! consume blocks strictly in input order. [`OrderedPendingSet`] holds completed
//! blocks keyed by sequence id and only hands out the next expected one.
//!
//! [`StallSlot`] is the single-item holding area for a block whose parse was cut
//! short because no record buffer was free; it is resumed before anything in the
//! pending set.

use std::collections::VecDeque;

use crate::error::{ResourceError, Result};

/// A buffer that accepts items tagged with sequence ids in any order and releases
/// them strictly in sequence order
///
/// Uses a sparse `VecDeque`: index `seq - next_seq` holds the item for `seq`.
#[derive(Debug)]
pub struct OrderedPendingSet<T> {
    slots: VecDeque<Option<T>>,
    next_seq: usize,
    count: usize,
}
impl<T> Default for OrderedPendingSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> OrderedPendingSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: VecDeque::new(),
            next_seq: 0,
            count: 0,
        }
    }

    /// Inserts an item with its sequence id
    ///
    /// Fails if the id was already released or is already pending.
    pub fn insert(&mut self, seq: usize, item: T) -> Result<()> {
        let Some(index) = seq.checked_sub(self.next_seq) else {
            return Err(self.unexpected(seq));
        };
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        if self.slots[index].is_some() {
            return Err(self.unexpected(seq));
        }
        self.slots[index] = Some(item);
        self.count += 1;
        Ok(())
    }

    fn unexpected(&self, seq: usize) -> crate::Error {
        ResourceError::UnexpectedSequence {
            seq,
            next: self.next_seq,
        }
        .into()
    }

    /// Returns true if the item with the next expected sequence id is present
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.slots.front().is_some_and(Option::is_some)
    }

    /// Removes and returns the item with the next expected sequence id, if present
    pub fn try_take_next(&mut self) -> Option<T> {
        if !self.has_next() {
            return None;
        }
        let item = self.slots.pop_front().flatten();
        self.next_seq += 1;
        self.count -= 1;
        item
    }

    /// Sequence id that will be released next
    #[must_use]
    pub fn next_seq(&self) -> usize {
        self.next_seq
    }

    /// Smallest sequence id currently pending
    #[must_use]
    pub fn min_pending(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(Option::is_some)
            .map(|index| self.next_seq + index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A holding area for at most one item
#[derive(Debug)]
pub struct StallSlot<T> {
    name: &'static str,
    item: Option<T>,
}
impl<T> StallSlot<T> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, item: None }
    }

    /// Places an item in the slot; fails if it is already occupied
    pub fn put(&mut self, item: T) -> Result<()> {
        if self.item.is_some() {
            return Err(ResourceError::StallSlotOccupied(self.name).into());
        }
        self.item = Some(item);
        Ok(())
    }

    pub fn take(&mut self) -> Option<T> {
        self.item.take()
    }

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.item.is_some()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_out_of_order_insert_in_order_release() {
        let mut pending = OrderedPendingSet::new();
        pending.insert(2, "c").unwrap();
        pending.insert(1, "b").unwrap();
        assert!(!pending.has_next());
        assert_eq!(pending.try_take_next(), None);
        assert_eq!(pending.min_pending(), Some(1));

        pending.insert(0, "a").unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.try_take_next(), Some("a"));
        assert_eq!(pending.try_take_next(), Some("b"));
        assert_eq!(pending.try_take_next(), Some("c"));
        assert_eq!(pending.try_take_next(), None);
        assert!(pending.is_empty());
        assert_eq!(pending.next_seq(), 3);
    }

    #[test]
    fn test_gap_blocks_release() {
        let mut pending = OrderedPendingSet::new();
        pending.insert(0, 10).unwrap();
        pending.insert(2, 30).unwrap();
        assert_eq!(pending.try_take_next(), Some(10));
        assert_eq!(pending.try_take_next(), None);
        assert_eq!(pending.min_pending(), Some(2));
        pending.insert(1, 20).unwrap();
        assert_eq!(pending.try_take_next(), Some(20));
        assert_eq!(pending.try_take_next(), Some(30));
    }

    #[test]
    fn test_reverse_insertion_order() {
        let mut pending = OrderedPendingSet::new();
        for seq in (0..64).rev() {
            pending.insert(seq, seq).unwrap();
        }
        let drained: Vec<usize> = std::iter::from_fn(|| pending.try_take_next()).collect();
        assert_eq!(drained, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_and_duplicate_ids_are_rejected() {
        let mut pending = OrderedPendingSet::new();
        pending.insert(0, 'a').unwrap();
        pending.insert(2, 'c').unwrap();
        assert!(matches!(
            pending.insert(2, 'x'),
            Err(crate::Error::ResourceError(ResourceError::UnexpectedSequence { seq: 2, next: 0 }))
        ));
        assert_eq!(pending.try_take_next(), Some('a'));
        assert!(matches!(
            pending.insert(0, 'y'),
            Err(crate::Error::ResourceError(ResourceError::UnexpectedSequence { seq: 0, next: 1 }))
        ));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.min_pending(), Some(2));
    }

    #[test]
    fn test_stall_slot_holds_one_item() {
        let mut slot = StallSlot::new("block");
        assert!(!slot.is_occupied());
        slot.put(1).unwrap();
        assert!(slot.is_occupied());
        assert!(slot.put(2).is_err());
        assert_eq!(slot.take(), Some(1));
        assert_eq!(slot.take(), None);
        slot.put(3).unwrap();
    }
}
