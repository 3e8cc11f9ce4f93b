//! Monotonically increasing transaction IDs for idempotent PUTs

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates opaque, monotonically increasing transaction IDs scoped to one
/// [`super::MatrixApi`] instance.
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    counter: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a generator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next transaction ID, e.g. `txn-17`.
    pub fn next(&self) -> String {
        let value = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("txn-{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing_and_unique() {
        let gen = TransactionIdGenerator::new();
        let first = gen.next();
        let second = gen.next();
        assert_ne!(first, second);
        assert!(first < second);
    }
}
