//! Fixed-capacity circular FIFO
//!
//! The storage primitive behind [`RingPool`](super::RingPool). Capacity is
//! set at construction and never changes; appending to a full buffer hands
//! the item back instead of growing.

/// Circular FIFO over a fixed number of slots.
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Next slot to write
    add_pos: usize,
    /// Oldest populated slot
    rem_pos: usize,
    used: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            add_pos: 0,
            rem_pos: 0,
            used: 0,
        }
    }

    /// Append an item at the tail.
    ///
    /// Returns the item back when every slot is populated.
    pub fn append(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.add_pos] = Some(item);
        self.add_pos = self.advance(self.add_pos);
        self.used += 1;
        Ok(())
    }

    /// Remove and return the oldest item
    pub fn remove(&mut self) -> Option<T> {
        if self.used == 0 {
            return None;
        }
        let item = self.slots[self.rem_pos].take();
        self.rem_pos = self.advance(self.rem_pos);
        self.used -= 1;
        item
    }

    /// Remove and return the most recently appended item
    pub fn remove_newest(&mut self) -> Option<T> {
        if self.used == 0 {
            return None;
        }
        let pos = self.retreat(self.add_pos);
        let item = self.slots[pos].take();
        self.add_pos = pos;
        self.used -= 1;
        item
    }

    /// Borrow the oldest item without removing it
    pub fn peek_oldest(&self) -> Option<&T> {
        if self.used == 0 {
            return None;
        }
        self.slots[self.rem_pos].as_ref()
    }

    /// Borrow the newest item without removing it
    pub fn peek_newest(&self) -> Option<&T> {
        if self.used == 0 {
            return None;
        }
        self.slots[self.retreat(self.add_pos)].as_ref()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of populated slots
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of empty slots
    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    #[inline]
    fn advance(&self, pos: usize) -> usize {
        if pos + 1 == self.capacity() {
            0
        } else {
            pos + 1
        }
    }

    #[inline]
    fn retreat(&self, pos: usize) -> usize {
        if pos == 0 {
            self.capacity() - 1
        } else {
            pos - 1
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let buffer: RingBuffer<i32> = RingBuffer::new(5);
        assert_eq!(buffer.capacity(), 5);
        assert_eq!(buffer.used(), 0);
        assert_eq!(buffer.available(), 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full() {
        let mut buffer = RingBuffer::new(5);
        for i in 0..buffer.capacity() {
            assert!(buffer.append(i).is_ok());
        }
        assert_eq!(buffer.used(), 5);
        assert_eq!(buffer.available(), 0);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_overflow_returns_item() {
        let mut buffer = RingBuffer::new(5);
        for i in 0..5 {
            buffer.append(i).unwrap();
        }
        assert_eq!(buffer.append(10), Err(10));
    }

    #[test]
    fn test_underflow() {
        let mut buffer: RingBuffer<i32> = RingBuffer::new(5);
        assert!(buffer.remove().is_none());
        assert!(buffer.remove_newest().is_none());
        assert!(buffer.peek_oldest().is_none());
        assert!(buffer.peek_newest().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let mut buffer = RingBuffer::new(3);
        buffer.append("a").unwrap();
        buffer.append("b").unwrap();
        assert_eq!(buffer.remove(), Some("a"));
        buffer.append("c").unwrap();
        buffer.append("d").unwrap();
        assert_eq!(buffer.remove(), Some("b"));
        assert_eq!(buffer.remove(), Some("c"));
        assert_eq!(buffer.remove(), Some("d"));
        assert_eq!(buffer.remove(), None);
    }

    #[test]
    fn test_ring_wraparound() {
        let mut buffer = RingBuffer::new(10);
        for i in 0..7 {
            buffer.append(i).unwrap();
        }
        for _ in 0..5 {
            buffer.remove();
        }
        for i in 0..7 {
            buffer.append(i + 7).unwrap();
        }
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.used(), 9);
        assert_eq!(buffer.available(), 1);
        assert!(buffer.append(100).is_ok(), "one slot left");
        assert!(buffer.append(101).is_err(), "buffer is full");

        // Oldest surviving item is the sixth appended
        assert_eq!(buffer.peek_oldest(), Some(&5));
        assert_eq!(buffer.peek_newest(), Some(&100));
    }

    #[test]
    fn test_remove_newest_across_wrap() {
        let mut buffer = RingBuffer::new(3);
        buffer.append(1).unwrap();
        buffer.append(2).unwrap();
        buffer.append(3).unwrap();
        buffer.remove();
        buffer.append(4).unwrap(); // lands in slot 0

        assert_eq!(buffer.remove_newest(), Some(4));
        assert_eq!(buffer.peek_newest(), Some(&3));
        buffer.append(5).unwrap();
        assert_eq!(buffer.remove(), Some(2));
        assert_eq!(buffer.remove(), Some(3));
        assert_eq!(buffer.remove(), Some(5));
    }

    #[test]
    fn test_zero_capacity() {
        let mut buffer = RingBuffer::new(0);
        assert!(buffer.is_full());
        assert_eq!(buffer.append(1), Err(1));
        assert!(buffer.remove().is_none());
    }
}
