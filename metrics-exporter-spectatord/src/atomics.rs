//! Atomic numeric helpers.
//!
//! The standard library has no atomic floating-point type, and no way to atomically keep the maximum of a signed value
//! without a compare-and-swap loop. Both are provided here on top of the native atomic integers: floats are stored as
//! their bit pattern in an `AtomicU64`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// An `f64` that can be updated atomically.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a new `AtomicF64` with the given initial value.
    pub fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    /// Gets the current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Sets the value.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Sets the value, returning the previous value.
    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel))
    }

    /// Adds `delta` to the current value.
    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

/// An `i64` that only ever moves up, until reset.
#[derive(Debug, Default)]
pub struct AtomicMax {
    value: AtomicI64,
}

impl AtomicMax {
    /// Creates a new `AtomicMax` with the given initial value.
    pub fn new(value: i64) -> Self {
        Self { value: AtomicI64::new(value) }
    }

    /// Gets the current maximum.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Raises the maximum to `value` if it is larger than the current maximum.
    pub fn update(&self, value: i64) {
        let mut current = self.value.load(Ordering::Relaxed);
        while value > current {
            match self.value.compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Resets the maximum to zero, returning the previous maximum.
    pub fn reset(&self) -> i64 {
        self.value.swap(0, Ordering::AcqRel)
    }
}
