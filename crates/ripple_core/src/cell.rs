//! Thread-safe holder of one immutable value
//!
//! [`AtomicCell`] is the only primitive through which the runtime touches
//! shared memory. Values are replaced whole, never mutated in place, and the
//! functional update path ([`AtomicCell::swap`]) is a compare-and-swap retry
//! loop: the update function may run more than once under contention, so it
//! must be free of observable side effects.

use std::sync::Mutex;

/// A thread-safe container for a single immutable value.
pub struct AtomicCell<T> {
    inner: Mutex<T>,
}

impl<T: Clone + PartialEq> AtomicCell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Snapshot read of the current value.
    pub fn get(&self) -> T {
        self.inner.lock().unwrap().clone()
    }

    /// Unconditionally replace the value, returning it.
    pub fn set(&self, value: T) -> T {
        *self.inner.lock().unwrap() = value.clone();
        value
    }

    /// Replace the value only if the current value equals `expected`
    /// (value equality, not identity). Returns whether the replacement
    /// happened.
    pub fn compare_and_set(&self, expected: &T, new: T) -> bool {
        let mut cur = self.inner.lock().unwrap();
        if *cur == *expected {
            *cur = new;
            true
        } else {
            false
        }
    }

    /// Atomically update the value by applying `f` to the current value and
    /// retrying on contention. `f` is applied only to the most current value
    /// and may be invoked multiple times, so it must not have observable
    /// side effects.
    pub fn swap<F>(&self, f: F) -> T
    where
        F: Fn(&T) -> T,
    {
        loop {
            let cur = self.get();
            let new = f(&cur);
            if self.compare_and_set(&cur, new.clone()) {
                return new;
            }
        }
    }
}

impl<T: Clone + PartialEq + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
