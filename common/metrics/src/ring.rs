use std::collections::VecDeque;

/// Fixed-capacity FIFO buffer: once full, every push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to one, a ring must be able to hold its latest entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an item, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iterator over the buffered items.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// The last `n` items, oldest first.
    pub fn last(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn keeps_the_last_capacity_items_in_order() {
        let mut ring = RingBuffer::new(100);
        for i in 0..250 {
            ring.push(i);
        }

        assert_eq!(ring.len(), 100);
        let items: Vec<i32> = ring.iter().copied().collect();
        assert_eq!(items, (150..250).collect::<Vec<_>>());
    }

    #[test]
    fn push_reports_evictions() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.push("a"), None);
        assert_eq!(ring.push("b"), None);
        assert_eq!(ring.push("c"), Some("a"));
        assert_eq!(ring.last(10), vec!["b", "c"]);
    }

    #[test]
    fn last_returns_oldest_first() {
        let mut ring = RingBuffer::new(10);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.last(3), vec![2, 3, 4]);
        assert_eq!(ring.last(0), Vec::<i32>::new());
        assert_eq!(ring.last(50), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut ring = RingBuffer::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.last(5), vec![2]);
    }
}
