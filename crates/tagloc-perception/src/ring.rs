//! Fixed-capacity ring buffer.
//!
//! Stores the most recent `capacity` items. Once full, each push overwrites
//! the logically oldest slot in place; nothing is ever shifted or popped.

use tagloc_types::LocalizerError;

/// Slots reserved up front; larger buffers grow as they fill.
const PREALLOCATED_SLOTS: usize = 64;

/// A circular store of the last `capacity` pushed items.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Next slot to write. Once full this is also the oldest item.
    cursor: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizerError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, LocalizerError> {
        if capacity == 0 {
            return Err(LocalizerError::InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity.min(PREALLOCATED_SLOTS)),
            capacity,
            cursor: 0,
        })
    }

    /// Insert `item`, overwriting the oldest entry when full.
    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.cursor] = item;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Items in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        // While filling, cursor == len and the first slice is empty.
        self.slots[self.cursor..]
            .iter()
            .chain(self.slots[..self.cursor].iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of the current contents in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let err = RingBuffer::<u8>::new(0).unwrap_err();
        assert_eq!(err, LocalizerError::InvalidCapacity(0));
    }

    #[test]
    fn huge_capacity_does_not_reserve_up_front() {
        let mut ring = RingBuffer::new(usize::MAX).unwrap();
        assert_eq!(ring.capacity(), usize::MAX);
        ring.push(7u8);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn starts_empty() {
        let ring = RingBuffer::<u8>::new(4).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
        assert!(ring.snapshot().is_empty());
    }

    #[test]
    fn fills_in_order_below_capacity() {
        let mut ring = RingBuffer::new(4).unwrap();
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.len(), 2);
        assert!(!ring.is_full());
        assert_eq!(ring.snapshot(), vec![1, 2]);
    }

    #[test]
    fn keeps_last_capacity_items_after_overflow() {
        let capacity = 3;
        for extra in 0..7 {
            let mut ring = RingBuffer::new(capacity).unwrap();
            let total = capacity + extra;
            for i in 0..total {
                ring.push(i);
            }
            let expected: Vec<usize> = (total - capacity..total).collect();
            assert_eq!(ring.snapshot(), expected, "after {total} pushes");
            assert_eq!(ring.len(), capacity);
        }
    }

    #[test]
    fn capacity_one_holds_latest() {
        let mut ring = RingBuffer::new(1).unwrap();
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.snapshot(), vec!["b"]);
        assert!(ring.is_full());
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let mut ring = RingBuffer::new(2).unwrap();
        ring.push(1);
        ring.push(2);
        ring.push(3);
        let first = ring.snapshot();
        let second = ring.snapshot();
        assert_eq!(first, second);
        assert_eq!(ring.capacity(), 2);
    }
}
