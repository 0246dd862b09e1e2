/// Fixed-capacity buffer that overwrites its oldest value once full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    oldest: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Panics on a zero capacity; callers pass compile-time constants.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            oldest: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the evicted value when the buffer was already full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.oldest + self.len) % cap;
            self.slots[idx] = Some(value);
            self.len += 1;
            return None;
        }
        let evicted = self.slots[self.oldest].replace(value);
        self.oldest = (self.oldest + 1) % cap;
        evicted
    }

    fn slot(&self, age: usize) -> Option<&T> {
        if age >= self.len {
            return None;
        }
        self.slots[(self.oldest + age) % self.capacity()].as_ref()
    }

    pub fn newest(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|age| self.slot(age))
    }

    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &T> {
        (0..self.len).filter_map(move |age| self.slot(age))
    }

    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        (0..self.len).rev().filter_map(move |age| self.slot(age))
    }
}
