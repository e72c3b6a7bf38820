// RingHistory - Fixed-capacity history, newest first
// Overwrites the oldest entry once full; cleared without releasing storage

use crate::error::{EngineError, EngineResult};
use std::ops::Index;

#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    items: Vec<T>,
    capacity: usize,
    write_index: usize,
}

impl<T> RingHistory<T> {
    /// Create an empty history. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            write_index: 0,
        }
    }

    /// Insert an item, overwriting the oldest one when full. O(1).
    pub fn insert(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.write_index] = item;
        }
        self.write_index = (self.write_index + 1) % self.capacity;
    }

    /// Element `index` steps back in time (0 = most recent)
    pub fn get(&self, index: usize) -> EngineResult<&T> {
        if index >= self.items.len() {
            return Err(EngineError::Bounds {
                index,
                len: self.items.len(),
            });
        }
        Ok(&self.items[self.physical(index)])
    }

    fn physical(&self, index: usize) -> usize {
        (self.write_index + self.capacity - 1 - index) % self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.get(0).ok()
    }

    /// Forget all items; the backing storage is kept for reuse
    pub fn clear(&mut self) {
        self.items.clear();
        self.write_index = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from the most recent item to the oldest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.items.len()).map(move |i| &self.items[self.physical(i)])
    }
}

impl<T> Index<usize> for RingHistory<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Ok(item) => item,
            Err(e) => panic!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut history = RingHistory::new(4);
        history.insert(10);
        history.insert(20);
        history.insert(30);

        assert_eq!(history.len(), 3);
        assert_eq!(history[0], 30);
        assert_eq!(history[1], 20);
        assert_eq!(history[2], 10);
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let capacity = 5;
        let mut history = RingHistory::new(capacity);
        for k in 1..=3 {
            history.clear();
            for value in 0..(capacity + k) {
                history.insert(value);
            }
            assert_eq!(history.len(), capacity);
            assert!(history.is_full());
            assert_eq!(history[0], capacity + k - 1);
            assert_eq!(history[capacity - 1], k);
        }
    }

    #[test]
    fn test_out_of_range_is_bounds_error() {
        let mut history = RingHistory::new(3);
        history.insert(1u8);

        assert_eq!(
            history.get(1),
            Err(EngineError::Bounds { index: 1, len: 1 })
        );
        assert!(history.get(0).is_ok());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_index_panics_out_of_range() {
        let history: RingHistory<i64> = RingHistory::new(2);
        let _ = history[0];
    }

    #[test]
    fn test_clear_keeps_storage() {
        let mut history = RingHistory::new(256);
        for t in 0..300i64 {
            history.insert(t);
        }
        let storage = history.items.capacity();

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.latest(), None);
        assert_eq!(history.items.capacity(), storage);

        history.insert(7);
        assert_eq!(history[0], 7);
    }

    #[test]
    fn test_iter_order() {
        let mut history = RingHistory::new(3);
        for v in 1..=5 {
            history.insert(v);
        }
        let values: Vec<_> = history.iter().copied().collect();
        assert_eq!(values, vec![5, 4, 3]);
    }
}
