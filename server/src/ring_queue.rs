//! Growable FIFO ring buffer
//!
//! Backs both of the dispatcher's deferred pipelines: outbound messages and
//! connections waiting to be closed. Records live in a circular slot buffer
//! that doubles when full. On growth only the smaller of the two wrapped
//! segments is relocated, so the logical order survives without copying the
//! whole buffer.

use crate::error::QueueError;

const START_CAPACITY: usize = 2;

/// FIFO queue over a circular buffer of slots.
///
/// `read` points at the oldest record, `write` at the slot the next record
/// goes into. When the queue is full the two cursors meet.
pub struct RingQueue<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    len: usize,
}

impl<T> RingQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(START_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            read: 0,
            write: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a record, doubling the buffer first if it is full.
    ///
    /// On allocation failure the queue is left untouched and the record is
    /// dropped.
    pub fn put(&mut self, record: T) -> Result<(), QueueError> {
        if self.len == self.capacity() {
            self.grow()?;
        }

        self.slots[self.write] = Some(record);
        self.write = (self.write + 1) % self.capacity();
        self.len += 1;

        Ok(())
    }

    /// Removes and returns the oldest record.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        let record = self.slots[self.read].take();
        self.read = (self.read + 1) % self.capacity();
        self.len -= 1;

        record
    }

    /// Iterates from oldest to newest without removing anything.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.read + offset) % capacity].as_ref())
    }

    /// Mutable counterpart of [`RingQueue::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        let len = self.len;
        let (front, back) = self.slots.split_at_mut(self.read);
        back.iter_mut()
            .chain(front.iter_mut())
            .take(len)
            .filter_map(Option::as_mut)
    }

    fn grow(&mut self) -> Result<(), QueueError> {
        let old_capacity = self.capacity();
        let new_capacity = old_capacity
            .checked_mul(2)
            .ok_or(QueueError::CapacityOverflow)?;

        self.slots.try_reserve_exact(new_capacity - old_capacity)?;
        self.slots.resize_with(new_capacity, || None);

        // Full means read == write. A zero cursor means the records already
        // sit in order at the front of the buffer.
        if self.read == 0 {
            self.write = old_capacity;
            return Ok(());
        }

        let newer = self.write;
        let older = old_capacity - self.read;

        if newer < older {
            // Move the wrapped front segment to just after the old end.
            for index in 0..newer {
                self.slots[old_capacity + index] = self.slots[index].take();
            }
            self.write = old_capacity + newer;
        } else {
            // Move the oldest segment to the end of the new buffer.
            let new_read = new_capacity - older;
            for offset in (0..older).rev() {
                self.slots[new_read + offset] = self.slots[self.read + offset].take();
            }
            self.read = new_read;
        }

        Ok(())
    }
}

impl<T: Default> RingQueue<T> {
    /// Removes and returns the oldest record, or `T::default()` when empty.
    ///
    /// Draining loops can call this unconditionally after an `is_empty`
    /// check without branching on an `Option`.
    pub fn get(&mut self) -> T {
        self.pop().unwrap_or_default()
    }
}

impl<T> Default for RingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
